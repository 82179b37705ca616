use axum::body::{Body, Bytes};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::cookies::CredentialStore;
use crate::error::{Error, Result};
use crate::refresh::RefreshCoordinator;

/// Request headers never copied to the backend.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "cookie",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers never copied back to the client.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection"];

fn is_dot_segment(segment: &str) -> bool {
    [".", "%2e", "..", ".%2e", "%2e.", "%2e%2e"]
        .iter()
        .any(|dot| segment.eq_ignore_ascii_case(dot))
}

/// One inbound API call, as forwarded to the backend.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path below the API prefix, without a leading slash
    pub target_path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Backend response, mirrored to the client as is.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        for (name, value) in self.headers.iter() {
            if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            response.headers_mut().append(name.clone(), value.clone());
        }
        response
    }
}

/// Forwards API calls to the backend with the caller's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedProxy {
    http: reqwest::Client,
    api_url: Url,
    refresher: RefreshCoordinator,
}

impl AuthenticatedProxy {
    pub fn new(api_url: Url, http: reqwest::Client, refresher: RefreshCoordinator) -> Self {
        Self {
            http,
            api_url,
            refresher,
        }
    }

    /// Backend URL for `request`: API base, path tail and original query.
    ///
    /// The tail is used as sent, percent-encoding included. Dot segments,
    /// encoded or not, are rejected so a tail cannot climb out of the API base.
    pub fn target_url(&self, request: &ProxyRequest) -> Result<Url> {
        if request.target_path.split('/').any(is_dot_segment) || request.target_path.contains('\\') {
            return Err(Error::InvalidRequest("invalid API path".to_string()));
        }

        let mut target = format!(
            "{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            request.target_path.trim_start_matches('/')
        );
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        target
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("invalid API path: {e}")))
    }

    /// Forward `request`, refreshing and retrying once on a backend 401.
    ///
    /// Only the first attempt's 401 is turned into a refresh; the retry's
    /// response is returned whatever its status. Any other backend status is
    /// passed through untouched.
    pub async fn forward(
        &self,
        request: &ProxyRequest,
        credentials: &mut CredentialStore,
    ) -> Result<UpstreamResponse> {
        let url = self.target_url(request)?;
        tracing::info!("proxying API request: {} {}", request.method, url.path());

        let mut attempt = 0;
        self.refresher
            .with_refresh(credentials, |access_token| {
                attempt += 1;
                let first_attempt = attempt == 1;
                let url = url.clone();
                async move {
                    let response = self.send(request, url, &access_token).await?;
                    if first_attempt && response.status == StatusCode::UNAUTHORIZED {
                        return Err(Error::Unauthorized);
                    }
                    Ok(response)
                }
            })
            .await
    }

    async fn send(
        &self,
        request: &ProxyRequest,
        url: Url,
        access_token: &str,
    ) -> Result<UpstreamResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(access_token);

        for (name, value) in request.headers.iter() {
            if !SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        tracing::info!("upstream response status: {}", status);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
