use std::future::Future;
use std::sync::Arc;

use crate::cookies::CredentialStore;
use crate::error::{Error, Result};
use crate::provider::ProviderClient;

/// Performs the single refresh a request is allowed after an upstream 401.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    provider: Arc<ProviderClient>,
}

impl RefreshCoordinator {
    pub fn new(provider: Arc<ProviderClient>) -> Self {
        Self { provider }
    }

    /// Trade the request's refresh cookie for a new credential pair.
    ///
    /// On success the pair is written to `credentials` and the new access
    /// token is returned. On failure nothing is written or cleared; the
    /// stale cookies stay until the client logs out.
    pub async fn attempt_refresh(&self, credentials: &mut CredentialStore) -> Option<String> {
        let Some(refresh_token) = credentials.refresh_token() else {
            tracing::info!("access token rejected and no refresh token present");
            return None;
        };

        match self.provider.refresh(&refresh_token).await {
            Ok(pair) => {
                credentials.store(&pair);
                Some(pair.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                None
            }
        }
    }

    /// Run `operation` with the current access token, refreshing and
    /// retrying once if it reports [`Error::Unauthorized`].
    ///
    /// Without an access token the operation never runs. The retry's result
    /// is final whatever it is, so a second 401 never triggers another
    /// refresh.
    pub async fn with_refresh<T, F, Fut>(
        &self,
        credentials: &mut CredentialStore,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let access_token = credentials.access_token().ok_or(Error::Unauthenticated)?;

        match operation(access_token).await {
            Err(e) if e.is_unauthorized() => {}
            outcome => return outcome,
        }

        tracing::info!("upstream rejected access token, attempting refresh");
        let renewed = self
            .attempt_refresh(credentials)
            .await
            .ok_or(Error::Unauthenticated)?;

        operation(renewed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use axum::http::{HeaderMap, HeaderValue, header};
    use axum_extra::extract::cookie::CookieJar;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/realms/test/protocol/openid-connect/token";

    fn coordinator(provider: &str) -> RefreshCoordinator {
        let config = GatewayConfig::new(
            provider.parse().unwrap(),
            "test",
            "web",
            "s3cret",
            "http://gw.local".parse().unwrap(),
            "http://app.local".parse().unwrap(),
            "http://api.local".parse().unwrap(),
        );
        let provider = ProviderClient::new(&config, reqwest::Client::new()).unwrap();
        RefreshCoordinator::new(Arc::new(provider))
    }

    fn credentials(cookie_header: &str) -> CredentialStore {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie_header).unwrap());
        CredentialStore::new(CookieJar::from_headers(&headers), false)
    }

    async fn token_endpoint(server: &MockServer, status: u16, calls: u64) {
        let template = if status == 200 {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT2",
                "refresh_token": "RT2",
            }))
        } else {
            ResponseTemplate::new(status)
        };
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=RT1"))
            .respond_with(template)
            .expect(calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn no_refresh_cookie_means_no_provider_call() {
        let server = MockServer::start().await;
        token_endpoint(&server, 200, 0).await;

        let mut creds = credentials("access_token=AT1");
        assert!(coordinator(&server.uri()).attempt_refresh(&mut creds).await.is_none());
    }

    #[tokio::test]
    async fn successful_refresh_updates_the_store() {
        let server = MockServer::start().await;
        token_endpoint(&server, 200, 1).await;

        let mut creds = credentials("access_token=AT1; refresh_token=RT1");
        let renewed = coordinator(&server.uri()).attempt_refresh(&mut creds).await;

        assert_eq!(renewed.as_deref(), Some("AT2"));
        assert_eq!(creds.access_token().as_deref(), Some("AT2"));
        assert_eq!(creds.refresh_token().as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn failed_refresh_leaves_cookies_alone() {
        let server = MockServer::start().await;
        token_endpoint(&server, 400, 1).await;

        let mut creds = credentials("access_token=AT1; refresh_token=RT1");
        assert!(coordinator(&server.uri()).attempt_refresh(&mut creds).await.is_none());
        assert_eq!(creds.access_token().as_deref(), Some("AT1"));
        assert_eq!(creds.refresh_token().as_deref(), Some("RT1"));
    }

    #[tokio::test]
    async fn missing_access_token_skips_the_operation() {
        let calls = AtomicUsize::new(0);
        let mut creds = credentials("refresh_token=RT1");

        let result: Result<()> = coordinator("http://id.local")
            .with_refresh(&mut creds, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(Error::Unauthenticated)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accepted_token_runs_once_without_refresh() {
        let server = MockServer::start().await;
        token_endpoint(&server, 200, 0).await;
        let calls = AtomicUsize::new(0);
        let mut creds = credentials("access_token=AT1; refresh_token=RT1");

        let result = coordinator(&server.uri())
            .with_refresh(&mut creds, |token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(token) }
            })
            .await;

        assert_eq!(result.unwrap(), "AT1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_rejection_is_final() {
        let server = MockServer::start().await;
        token_endpoint(&server, 200, 1).await;
        let seen = std::sync::Mutex::new(Vec::new());
        let mut creds = credentials("access_token=AT1; refresh_token=RT1");

        let result: Result<()> = coordinator(&server.uri())
            .with_refresh(&mut creds, |token| {
                seen.lock().unwrap().push(token);
                async { Err(Error::Unauthorized) }
            })
            .await;

        assert!(matches!(result, Err(Error::Unauthorized)));
        assert_eq!(*seen.lock().unwrap(), vec!["AT1".to_string(), "AT2".to_string()]);
    }

    #[tokio::test]
    async fn non_401_failures_are_not_retried() {
        let server = MockServer::start().await;
        token_endpoint(&server, 200, 0).await;
        let calls = AtomicUsize::new(0);
        let mut creds = credentials("access_token=AT1; refresh_token=RT1");

        let result: Result<()> = coordinator(&server.uri())
            .with_refresh(&mut creds, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::ProviderUnavailable("down".into())) }
            })
            .await;

        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
