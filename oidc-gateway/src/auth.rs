//! Identity lookup behind `/auth/validate`.
//!
//! Resolves the caller's access token to the provider's identity claims,
//! reading through the identity cache and refreshing the session once if
//! the provider rejects the token.

use std::sync::Arc;

use serde::Serialize;

use crate::cookies::CredentialStore;
use crate::error::{Error, Result};
use crate::provider::ProviderClient;
use crate::refresh::RefreshCoordinator;
use crate::session::IdentityRecord;
use crate::store::{IDENTITY_CACHE_TTL, IdentityCache};

/// Body of the validation response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IdentityRecord>,
}

impl Validation {
    pub fn authenticated(user: IdentityRecord) -> Self {
        Self {
            is_authenticated: true,
            user: Some(user),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            is_authenticated: false,
            user: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    provider: Arc<ProviderClient>,
    cache: Arc<dyn IdentityCache>,
    refresher: RefreshCoordinator,
}

impl IdentityResolver {
    pub fn new(
        provider: Arc<ProviderClient>,
        cache: Arc<dyn IdentityCache>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            provider,
            cache,
            refresher,
        }
    }

    /// Cache first, then the provider; a provider answer is cached under the token.
    pub async fn lookup(&self, access_token: &str) -> Result<IdentityRecord> {
        if let Some(identity) = self.cache.get(access_token).await {
            tracing::debug!("identity cache hit");
            return Ok(identity);
        }

        let identity = self.provider.fetch_identity(access_token).await?;
        self.cache
            .put(access_token, &identity, IDENTITY_CACHE_TTL)
            .await;
        Ok(identity)
    }

    /// Validate the session held in `credentials`.
    ///
    /// Never fails: every failure collapses into an unauthenticated result.
    /// A successful refresh along the way is written to `credentials`.
    pub async fn validate(&self, credentials: &mut CredentialStore) -> Validation {
        let outcome = self
            .refresher
            .with_refresh(credentials, |access_token| async move {
                self.lookup(&access_token).await
            })
            .await;

        match outcome {
            Ok(identity) => {
                tracing::info!(sub = identity.subject().unwrap_or("-"), "session validated");
                Validation::authenticated(identity)
            }
            Err(Error::Unauthenticated | Error::Unauthorized) => Validation::unauthenticated(),
            Err(e) => {
                tracing::error!(error = %e, "identity lookup failed");
                Validation::unauthenticated()
            }
        }
    }
}
