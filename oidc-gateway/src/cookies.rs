//! Credential store backed by the browser's cookies.
//!
//! The gateway keeps no server-side session: the access and refresh
//! credentials travel in two HttpOnly cookies and every response that
//! renews them carries the new values as `Set-Cookie` directives.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use time::Duration;

use crate::session::CredentialPair;

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
pub const STATE_COOKIE_NAME: &str = "oauth_state";

/// The access cookie lives exactly one hour regardless of the token's own expiry.
pub const ACCESS_COOKIE_TTL: Duration = Duration::hours(1);

const STATE_COOKIE_TTL: Duration = Duration::minutes(5);
const STATE_COOKIE_PATH: &str = "/auth";

/// Request-scoped view of the credential cookies.
///
/// Reads see cookies written earlier in the same request, so a refreshed
/// access token is visible to the retry that follows it.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    jar: CookieJar,
    secure: bool,
}

impl CredentialStore {
    pub fn new(jar: CookieJar, secure: bool) -> Self {
        Self { jar, secure }
    }

    pub fn access_token(&self) -> Option<String> {
        self.value(ACCESS_COOKIE_NAME)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.value(REFRESH_COOKIE_NAME)
    }

    /// Value of the login `state` cookie, if the login started here.
    pub fn login_state(&self) -> Option<String> {
        self.value(STATE_COOKIE_NAME)
    }

    /// Write both credential cookies for `pair`.
    pub fn store(&mut self, pair: &CredentialPair) {
        let access = self.credential_cookie(
            ACCESS_COOKIE_NAME,
            pair.access_token.clone(),
            ACCESS_COOKIE_TTL,
        );
        self.add(access);

        if let Some(refresh_token) = &pair.refresh_token {
            let ttl = Duration::seconds(pair.refresh_ttl_secs(Utc::now()));
            let refresh = self.credential_cookie(REFRESH_COOKIE_NAME, refresh_token.clone(), ttl);
            self.add(refresh);
        }
    }

    /// Expire both credential cookies.
    pub fn clear(&mut self) {
        self.add(removal_cookie(ACCESS_COOKIE_NAME, "/"));
        self.add(removal_cookie(REFRESH_COOKIE_NAME, "/"));
    }

    pub fn store_login_state(&mut self, state: &str) {
        let cookie = Cookie::build((STATE_COOKIE_NAME, state.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path(STATE_COOKIE_PATH)
            .max_age(STATE_COOKIE_TTL)
            .build();
        self.add(cookie);
    }

    pub fn clear_login_state(&mut self) {
        self.add(removal_cookie(STATE_COOKIE_NAME, STATE_COOKIE_PATH));
    }

    /// Hand the jar back so its pending `Set-Cookie` directives reach the response.
    pub fn into_jar(self) -> CookieJar {
        self.jar
    }

    fn value(&self, name: &str) -> Option<String> {
        self.jar
            .get(name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn add(&mut self, cookie: Cookie<'static>) {
        let jar = std::mem::take(&mut self.jar);
        self.jar = jar.add(cookie);
    }

    fn credential_cookie(&self, name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(ttl)
            .build()
    }
}

fn removal_cookie(name: &'static str, path: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path(path)
        .max_age(Duration::ZERO)
        .build()
}
