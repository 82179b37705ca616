//! # oidc-gateway
//!
//! A cookie-session gateway between a browser frontend, an OpenID Connect
//! identity provider and a bearer-token protected backend API.
//!
//! The browser never sees a token it can read: the gateway runs the
//! authorization code flow, keeps the access and refresh tokens in HttpOnly
//! cookies and attaches the access token to every API call it forwards.
//! When the provider or the backend rejects an access token the gateway
//! refreshes it once and retries the call once.
//!
//! ## Endpoints
//!
//! - `GET /auth/login`: redirect to the provider's authorization endpoint
//! - `GET /auth/callback`: exchange the code, set cookies, redirect to the app
//! - `GET /auth/logout`: clear cookies, redirect to the provider's logout
//! - `GET /auth/validate`: report the session's identity claims
//! - `/api/v1/*`: forward to the backend API with the session's bearer token
//! - `GET /health`: liveness probe
//!
//! ## Example
//!
//! ```rust,no_run
//! use oidc_gateway::{GatewayConfig, GatewayServer, store};
//!
//! # async fn example() -> oidc_gateway::Result<()> {
//! let config = GatewayConfig::from_env()?;
//! let gateway = GatewayServer::builder()
//!     .identity_cache(store::identity_cache(&config.cache))
//!     .config(config)
//!     .build()?;
//!
//! let app = gateway.router();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cookies;
pub mod error;
pub mod provider;
pub mod proxy;
pub mod refresh;
pub mod server;
pub mod session;
pub mod store;

pub use auth::{IdentityResolver, Validation};
pub use config::{CacheBackend, CacheConfig, GatewayConfig};
pub use cookies::CredentialStore;
pub use error::{Error, Result};
pub use provider::{ProviderClient, ProviderEndpoints};
pub use proxy::{AuthenticatedProxy, ProxyRequest, UpstreamResponse};
pub use refresh::RefreshCoordinator;
pub use server::{GatewayServer, GatewayServerBuilder};
pub use session::{CredentialPair, IdentityRecord, TokenResponse};
pub use store::{DisabledCache, IdentityCache, MemoryCache, RedisCache};
