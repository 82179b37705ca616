use crate::{
    auth::IdentityResolver,
    config::GatewayConfig,
    cookies::CredentialStore,
    error::{Error, Result},
    provider::ProviderClient,
    proxy::{AuthenticatedProxy, ProxyRequest},
    refresh::RefreshCoordinator,
    store::{DisabledCache, IdentityCache},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;

const STATE_LENGTH: usize = 32;
const API_PREFIX: &str = "/api/v1/";

/// The gateway: login flow, session validation and the authenticated API proxy.
#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    provider: Arc<ProviderClient>,
    resolver: Arc<IdentityResolver>,
    proxy: Arc<AuthenticatedProxy>,
}

impl GatewayServer {
    pub fn builder() -> GatewayServerBuilder {
        GatewayServerBuilder::default()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Create the axum router with all gateway endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/auth/login", get(handle_login))
            .route("/auth/callback", get(handle_callback))
            .route("/auth/logout", get(handle_logout))
            .route("/auth/validate", get(handle_validate))
            .route("/api/v1/{*path}", any(handle_api_proxy))
            .route("/health", get(handle_health))
            .with_state(self.clone())
    }

    fn credentials(&self, jar: CookieJar) -> CredentialStore {
        CredentialStore::new(jar, self.config.secure_cookies())
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Start the authorization code flow at the provider.
async fn handle_login(State(server): State<GatewayServer>, jar: CookieJar) -> Response {
    let state = generate_random_string(STATE_LENGTH);
    let url = server.provider.authorization_url(&state);
    tracing::info!("redirecting to provider login");

    let mut credentials = server.credentials(jar);
    credentials.store_login_state(&state);
    (credentials.into_jar(), found(url.as_str())).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn handle_callback(
    State(server): State<GatewayServer>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<Response> {
    if let Some(error) = &params.error {
        tracing::warn!(
            "provider returned error on callback: {} ({})",
            error,
            params.error_description.as_deref().unwrap_or("no description")
        );
        return Err(Error::InvalidRequest(format!("authorization failed: {error}")));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing authorization code".to_string()))?;

    let mut credentials = server.credentials(jar);
    if let Some(expected) = credentials.login_state() {
        if params.state.as_deref() != Some(expected.as_str()) {
            tracing::warn!("callback state does not match login state");
            return Err(Error::InvalidRequest("state mismatch".to_string()));
        }
    }

    let pair = server.provider.exchange_code(&code).await?;
    tracing::info!("authorization code exchanged");

    credentials.store(&pair);
    credentials.clear_login_state();
    Ok((credentials.into_jar(), found(server.config.app_url.as_str())).into_response())
}

async fn handle_logout(State(server): State<GatewayServer>, jar: CookieJar) -> Response {
    let mut credentials = server.credentials(jar);
    credentials.clear();
    let url = server.provider.logout_url();
    tracing::info!("session cleared, redirecting to provider logout");
    (credentials.into_jar(), found(url.as_str())).into_response()
}

async fn handle_validate(State(server): State<GatewayServer>, jar: CookieJar) -> Response {
    let mut credentials = server.credentials(jar);
    let validation = server.resolver.validate(&mut credentials).await;
    let status = if validation.is_authenticated {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (credentials.into_jar(), (status, Json(validation))).into_response()
}

/// Forward `/api/v1/*` to the backend on the caller's behalf.
///
/// The path tail is taken from the raw request URI so its percent-encoding
/// reaches the backend unchanged.
async fn handle_api_proxy(
    State(server): State<GatewayServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let target_path = uri
        .path()
        .strip_prefix(API_PREFIX)
        .unwrap_or_default()
        .to_string();
    let request = ProxyRequest {
        method,
        target_path,
        query: uri.query().map(str::to_string),
        headers,
        body,
    };

    let mut credentials = server.credentials(jar);
    match server.proxy.forward(&request, &mut credentials).await {
        Ok(upstream) => (credentials.into_jar(), upstream).into_response(),
        Err(e) => (credentials.into_jar(), e).into_response(),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn generate_random_string(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Builder for [`GatewayServer`].
#[derive(Default)]
pub struct GatewayServerBuilder {
    config: Option<GatewayConfig>,
    identity_cache: Option<Arc<dyn IdentityCache>>,
}

impl GatewayServerBuilder {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Cache for identity lookups. Without one every lookup hits the provider.
    pub fn identity_cache(mut self, cache: Arc<dyn IdentityCache>) -> Self {
        self.identity_cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<GatewayServer> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config required".to_string()))?;
        let cache = self
            .identity_cache
            .unwrap_or_else(|| Arc::new(DisabledCache));

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let provider = Arc::new(ProviderClient::new(&config, http.clone())?);
        let refresher = RefreshCoordinator::new(provider.clone());
        let resolver = IdentityResolver::new(provider.clone(), cache, refresher.clone());
        let proxy = AuthenticatedProxy::new(config.api_url.clone(), http, refresher);

        Ok(GatewayServer {
            config: Arc::new(config),
            provider,
            resolver: Arc::new(resolver),
            proxy: Arc::new(proxy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn server() -> GatewayServer {
        let config = GatewayConfig::new(
            "http://id.local".parse().unwrap(),
            "test",
            "web",
            "s3cret",
            "http://gw.local".parse().unwrap(),
            "http://app.local".parse().unwrap(),
            "http://api.local".parse().unwrap(),
        );
        GatewayServer::builder().config(config).build().unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn build_requires_config() {
        assert!(matches!(
            GatewayServer::builder().build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn random_state_is_alphanumeric() {
        let state = generate_random_string(STATE_LENGTH);
        assert_eq!(state.len(), STATE_LENGTH);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(state, generate_random_string(STATE_LENGTH));
    }

    #[tokio::test]
    async fn login_sets_state_cookie_matching_redirect() {
        let response = server()
            .router()
            .oneshot(Request::get("/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location: url::Url = response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let state = location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with(&format!("oauth_state={state}"))));
    }

    #[tokio::test]
    async fn callback_without_code_is_bad_request() {
        let response = server()
            .router()
            .oneshot(Request::get("/auth/callback").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_with_provider_error_is_bad_request() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/auth/callback?error=access_denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn callback_with_mismatched_state_is_rejected() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/auth/callback?code=abc&state=forged")
                    .header(header::COOKIE, "oauth_state=expected")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_clears_cookies_and_redirects_to_provider() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/auth/logout")
                    .header(header::COOKIE, "access_token=AT1; refresh_token=RT1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with(
            "http://id.local/realms/test/protocol/openid-connect/logout?"
        ));

        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=;") && c.contains("Max-Age=0")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=;") && c.contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn validate_without_cookie_is_unauthorized() {
        let response = server()
            .router()
            .oneshot(Request::get("/auth/validate").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({ "isAuthenticated": false })
        );
    }

    #[tokio::test]
    async fn proxy_without_cookie_is_unauthorized() {
        let response = server()
            .router()
            .oneshot(Request::get("/api/v1/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({ "error": "Unauthorized" })
        );
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = server()
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
