use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::{Error, Result};
use crate::session::IdentityRecord;

/// How long an identity lookup stays cached.
pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Read-through cache for userinfo responses, keyed by access token.
///
/// Best effort only: implementations swallow their own failures and report
/// a miss, so the authentication path never waits on or fails because of
/// the cache.
#[async_trait]
pub trait IdentityCache: Send + Sync + Debug {
    async fn get(&self, access_token: &str) -> Option<IdentityRecord>;

    async fn put(&self, access_token: &str, record: &IdentityRecord, ttl: Duration);
}

/// Cache used when none is configured. Every lookup misses.
#[derive(Debug, Clone, Default)]
pub struct DisabledCache;

#[async_trait]
impl IdentityCache for DisabledCache {
    async fn get(&self, _access_token: &str) -> Option<IdentityRecord> {
        None
    }

    async fn put(&self, _access_token: &str, _record: &IdentityRecord, _ttl: Duration) {}
}

/// In-process cache backed by a HashMap.
///
/// No capacity limit; expired entries are dropped when next read.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, (IdentityRecord, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityCache for MemoryCache {
    async fn get(&self, access_token: &str) -> Option<IdentityRecord> {
        let mut entries = self.entries.write().await;
        match entries.get(access_token) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(access_token);
                None
            }
            Some((record, _)) => Some(record.clone()),
            None => None,
        }
    }

    async fn put(&self, access_token: &str, record: &IdentityRecord, ttl: Duration) {
        self.entries.write().await.insert(
            access_token.to_string(),
            (record.clone(), Instant::now() + ttl),
        );
    }
}

/// Redis-backed cache.
///
/// Connects lazily on first use and reuses the connection afterwards. A
/// failed connect is retried on the next call. Each call is bounded by the
/// configured timeout.
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Parses the connection parameters; no network I/O happens here.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info())
            .map_err(|e| Error::Config(format!("invalid redis connection parameters: {e}")))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            timeout: config.timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                self.client
                    .get_connection_manager()
                    .await
                    .map_err(|e| Error::CacheUnavailable(e.to_string()))
            })
            .await?;
        Ok(manager.clone())
    }

    async fn try_get(&self, access_token: &str) -> Result<Option<IdentityRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(access_token)
            .await
            .map_err(|e| Error::CacheUnavailable(e.to_string()))?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::CacheUnavailable(format!("corrupt cache entry: {e}"))),
            None => Ok(None),
        }
    }

    async fn try_put(&self, access_token: &str, record: &IdentityRecord, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| Error::Internal(e.to_string()))?;
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(access_token, json, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::CacheUnavailable(e.to_string()))
    }
}

#[async_trait]
impl IdentityCache for RedisCache {
    async fn get(&self, access_token: &str) -> Option<IdentityRecord> {
        match tokio::time::timeout(self.timeout, self.try_get(access_token)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "identity cache read failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!("identity cache read timed out, treating as miss");
                None
            }
        }
    }

    async fn put(&self, access_token: &str, record: &IdentityRecord, ttl: Duration) {
        match tokio::time::timeout(self.timeout, self.try_put(access_token, record, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "identity cache write failed, skipping"),
            Err(_) => tracing::warn!("identity cache write timed out, skipping"),
        }
    }
}

/// Build the cache selected by `backend`, falling back to [`DisabledCache`].
///
/// Never fails: a cache that cannot be configured must not stop startup.
pub fn identity_cache(backend: &CacheBackend) -> Arc<dyn IdentityCache> {
    match backend {
        CacheBackend::Disabled => {
            tracing::info!("identity cache disabled");
            Arc::new(DisabledCache)
        }
        CacheBackend::Memory => {
            tracing::info!("identity cache in process memory");
            Arc::new(MemoryCache::new())
        }
        CacheBackend::Redis(config) => match RedisCache::new(config) {
            Ok(cache) => {
                tracing::info!("identity cache at {}:{}", config.host, config.port);
                Arc::new(cache)
            }
            Err(e) => {
                tracing::warn!(error = %e, "identity cache unavailable, continuing without it");
                Arc::new(DisabledCache)
            }
        },
    }
}
