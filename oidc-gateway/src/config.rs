use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use url::Url;

use crate::error::{Error, Result};

/// Scopes requested from the identity provider on login.
pub const DEFAULT_SCOPES: &str = "openid profile email";

/// Connection parameters for the network identity cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Upper bound for a single cache round trip, connection included
    pub timeout: Duration,
}

impl CacheConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 6379,
            password: None,
            timeout: Duration::from_millis(500),
        }
    }

    /// Redis connection parameters. The password is passed through as is,
    /// never spliced into a URL.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// Where identity lookups are cached.
#[derive(Debug, Clone, Default)]
pub enum CacheBackend {
    /// Every lookup goes to the provider.
    #[default]
    Disabled,
    /// In-process map; entries are not shared between gateway instances.
    Memory,
    Redis(CacheConfig),
}

/// Configuration for the authentication gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the identity provider (without the realm path)
    pub provider_url: Url,

    /// Realm the client is registered in
    pub realm: String,

    pub client_id: String,
    pub client_secret: String,

    /// Public address of this gateway; the callback URI hangs off it
    pub public_url: Url,

    /// Frontend the browser returns to after login and logout
    pub app_url: Url,

    /// Backend API that authenticated calls are forwarded to
    pub api_url: Url,

    /// Space separated OAuth scopes
    pub scope: String,

    /// Marks cookies `Secure` when set
    pub production: bool,

    /// Timeout applied to every provider and backend call
    pub request_timeout: Duration,

    /// Identity cache backend
    pub cache: CacheBackend,
}

impl GatewayConfig {
    pub fn new(
        provider_url: Url,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        public_url: Url,
        app_url: Url,
        api_url: Url,
    ) -> Self {
        Self {
            provider_url,
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            public_url,
            app_url,
            api_url,
            scope: DEFAULT_SCOPES.to_string(),
            production: false,
            request_timeout: Duration::from_secs(10),
            cache: CacheBackend::Disabled,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OIDC_PROVIDER_URL`, `OIDC_REALM`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET`
    /// - `PUBLIC_URL`: this gateway's public base URL
    /// - `APP_URL`: frontend URL
    /// - `API_URL`: backend API base URL
    ///
    /// # Optional env vars
    /// - `APP_ENV`: `production` turns on `Secure` cookies
    /// - `REQUEST_TIMEOUT_SECS`: provider and backend timeout (default 10)
    /// - `IDENTITY_CACHE`: `redis`, `memory` or `none`; without it Redis is
    ///   used when `REDIS_HOST` is set and the cache is disabled otherwise
    /// - `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `CACHE_TIMEOUT_MS`:
    ///   Redis connection
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(
            env_url("OIDC_PROVIDER_URL")?,
            env_required("OIDC_REALM")?,
            env_required("OIDC_CLIENT_ID")?,
            env_required("OIDC_CLIENT_SECRET")?,
            env_url("PUBLIC_URL")?,
            env_url("APP_URL")?,
            env_url("API_URL")?,
        );

        config.production = matches!(std::env::var("APP_ENV").as_deref(), Ok("production"));

        if let Ok(secs) = std::env::var("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::Config(format!("REQUEST_TIMEOUT_SECS: {e}")))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        config.cache = match std::env::var("IDENTITY_CACHE").ok().as_deref() {
            Some("memory") => CacheBackend::Memory,
            Some("none") | Some("disabled") => CacheBackend::Disabled,
            Some("redis") => CacheBackend::Redis(redis_from_env()?.ok_or_else(|| {
                Error::Config("IDENTITY_CACHE=redis requires REDIS_HOST".to_string())
            })?),
            Some(other) => {
                return Err(Error::Config(format!("unknown IDENTITY_CACHE backend: {other}")));
            }
            None => redis_from_env()?.map_or(CacheBackend::Disabled, CacheBackend::Redis),
        };

        Ok(config)
    }

    /// Set custom scopes
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Toggle production mode (secure cookies)
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Set the provider/backend request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cache identity lookups in Redis
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = CacheBackend::Redis(cache);
        self
    }

    /// Cache identity lookups in process memory
    #[must_use]
    pub fn with_memory_cache(mut self) -> Self {
        self.cache = CacheBackend::Memory;
        self
    }

    /// Redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}/auth/callback",
            self.public_url.as_str().trim_end_matches('/')
        )
    }

    /// Whether cookies carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.production
    }
}

fn redis_from_env() -> Result<Option<CacheConfig>> {
    let Ok(host) = std::env::var("REDIS_HOST") else {
        return Ok(None);
    };

    let mut cache = CacheConfig::new(host);
    if let Ok(port) = std::env::var("REDIS_PORT") {
        cache.port = port
            .parse()
            .map_err(|e| Error::Config(format!("REDIS_PORT: {e}")))?;
    }
    cache.password = std::env::var("REDIS_PASSWORD")
        .ok()
        .filter(|p| !p.is_empty());
    if let Ok(ms) = std::env::var("CACHE_TIMEOUT_MS") {
        let ms: u64 = ms
            .parse()
            .map_err(|e| Error::Config(format!("CACHE_TIMEOUT_MS: {e}")))?;
        cache.timeout = Duration::from_millis(ms);
    }
    Ok(Some(cache))
}

fn env_required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is required")))
}

fn env_url(name: &str) -> Result<Url> {
    env_required(name)?
        .parse()
        .map_err(|e| Error::Config(format!("{name}: {e}")))
}
