use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Session errors
    /// No usable credential on the inbound request, or the refresh path gave up.
    #[error("unauthenticated")]
    Unauthenticated,

    /// An upstream answered 401. Triggers the refresh-and-retry sequence.
    #[error("unauthorized")]
    Unauthorized,

    // Provider errors
    #[error("authorization code exchange failed: {0}")]
    AuthExchangeFailed(String),

    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    // Backend errors
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    // Cache errors
    #[error("identity cache unavailable: {0}")]
    CacheUnavailable(String),

    // Request errors
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the internal "upstream said 401" signal.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Error::Unauthenticated | Error::Unauthorized | Error::RefreshFailed(_) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::InvalidRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::AuthExchangeFailed(ref detail) => {
                tracing::error!(error = %detail, "authorization code exchange failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Authentication failed".to_string(),
                )
            }
            Error::ProviderUnavailable(_)
            | Error::BackendUnavailable(_)
            | Error::CacheUnavailable(_)
            | Error::Config(_)
            | Error::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_as_plain_unauthorized() {
        let response = Error::RefreshFailed("invalid_grant".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_of(response).await,
            serde_json::json!({ "error": "Unauthorized" })
        );
    }

    #[tokio::test]
    async fn exchange_failure_hides_provider_detail() {
        let response =
            Error::AuthExchangeFailed("status 400: invalid_grant".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["error"], "Authentication failed");
        assert!(!body.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn invalid_request_keeps_its_message() {
        let response = Error::InvalidRequest("Missing authorization code".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await["error"], "Missing authorization code");
    }
}
