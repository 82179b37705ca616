use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime of the access credential when the provider does not state one.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;

/// Lifetime of the refresh credential when the provider omits `refresh_expires_in`.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 24 * 3600;

/// Access and refresh credentials for one browser session.
///
/// Lives entirely in the client's cookies. Created by a code exchange or a
/// refresh and replaced wholesale by the next refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl CredentialPair {
    /// Build a pair from a token endpoint response received at `now`.
    ///
    /// Missing, non-positive or unrepresentable lifetimes fall back to the
    /// defaults. Keycloak reports `refresh_expires_in: 0` for refresh tokens
    /// that do not expire on their own.
    pub fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_expires_at: expiry(now, response.expires_in, DEFAULT_ACCESS_TTL_SECS),
            refresh_expires_at: expiry(now, response.refresh_expires_in, DEFAULT_REFRESH_TTL_SECS),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        }
    }

    /// Whole seconds until the refresh credential lapses, rounded up.
    pub fn refresh_ttl_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.refresh_expires_at - now).num_milliseconds();
        if millis <= 0 { 0 } else { (millis + 999) / 1000 }
    }
}

fn expiry(now: DateTime<Utc>, stated_secs: Option<i64>, default_secs: i64) -> DateTime<Utc> {
    let after = |secs: i64| Duration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl));

    stated_secs
        .filter(|secs| *secs > 0)
        .and_then(after)
        .or_else(|| after(default_secs))
        .unwrap_or(now)
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

/// Claims the provider returns for the authenticated principal.
///
/// Passed through to the frontend untouched, so it stays an open map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRecord(pub serde_json::Map<String, serde_json::Value>);

impl IdentityRecord {
    /// The `sub` claim, if the provider sent one.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(|v| v.as_str())
    }
}
