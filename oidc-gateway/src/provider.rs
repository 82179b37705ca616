use chrono::Utc;
use reqwest::StatusCode;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::session::{CredentialPair, IdentityRecord, TokenResponse};

/// OpenID Connect endpoints of one provider realm.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorization: Url,
    pub token: Url,
    pub userinfo: Url,
    pub logout: Url,
}

impl ProviderEndpoints {
    /// Derive the endpoints under `{provider}/realms/{realm}/protocol/openid-connect/`.
    pub fn for_realm(provider_url: &Url, realm: &str) -> Result<Self> {
        let base = format!(
            "{}/realms/{}/protocol/openid-connect",
            provider_url.as_str().trim_end_matches('/'),
            realm
        );
        let endpoint = |name: &str| -> Result<Url> {
            format!("{base}/{name}")
                .parse()
                .map_err(|e| Error::Config(format!("invalid provider endpoint {name}: {e}")))
        };

        Ok(Self {
            authorization: endpoint("auth")?,
            token: endpoint("token")?,
            userinfo: endpoint("userinfo")?,
            logout: endpoint("logout")?,
        })
    }
}

/// Client for the identity provider's token and userinfo endpoints.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    endpoints: ProviderEndpoints,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    post_logout_redirect: Url,
}

impl ProviderClient {
    /// `http` is expected to carry the gateway's request timeout.
    pub fn new(config: &GatewayConfig, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            http,
            endpoints: ProviderEndpoints::for_realm(&config.provider_url, &config.realm)?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri(),
            scope: config.scope.clone(),
            post_logout_redirect: config.app_url.clone(),
        })
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    /// Authorization endpoint URL the browser is sent to on login.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.endpoints.authorization.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url
    }

    /// End-session URL the browser is sent to on logout.
    pub fn logout_url(&self) -> Url {
        let mut url = self.endpoints.logout.clone();
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", self.post_logout_redirect.as_str())
            .append_pair("client_id", &self.client_id);
        url
    }

    /// Exchange an authorization code for a credential pair.
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialPair> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .request_tokens(&form)
            .await
            .map_err(Error::AuthExchangeFailed)?;

        tracing::info!("exchanged authorization code for tokens");
        Ok(CredentialPair::from_token_response(response, Utc::now()))
    }

    /// Trade a refresh token for a new credential pair.
    ///
    /// A failure here is terminal for the session; callers must not retry.
    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let mut response = self
            .request_tokens(&form)
            .await
            .map_err(Error::RefreshFailed)?;

        // Providers without rotation leave the old refresh token valid.
        if response.refresh_token.is_none() {
            response.refresh_token = Some(refresh_token.to_string());
        }

        tracing::info!("refreshed access token");
        Ok(CredentialPair::from_token_response(response, Utc::now()))
    }

    /// Look up the principal behind `access_token` at the userinfo endpoint.
    pub async fn fetch_identity(&self, access_token: &str) -> Result<IdentityRecord> {
        let response = self
            .http
            .get(self.endpoints.userinfo.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            return Err(Error::ProviderUnavailable(format!(
                "userinfo returned {status}"
            )));
        }

        response
            .json::<IdentityRecord>()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("invalid userinfo response: {e}")))
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> std::result::Result<TokenResponse, String> {
        let response = self
            .http
            .post(self.endpoints.token.clone())
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "token endpoint rejected request");
            return Err(format!("token endpoint returned {status}: {body}"));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}
