//! Gateway binary.
//!
//! Reads its configuration from the environment (see
//! [`GatewayConfig::from_env`]) and serves the gateway on `BIND_ADDR`,
//! `0.0.0.0:3000` by default.

use std::net::SocketAddr;

use http::{HeaderValue, Method, header};
use miette::{IntoDiagnostic, WrapErr};
use oidc_gateway::{GatewayConfig, GatewayServer, store};
use tower_http::cors::CorsLayer;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,oidc_gateway=info,info".into()),
        )
        .init();

    let config = GatewayConfig::from_env()
        .into_diagnostic()
        .wrap_err("failed to load gateway configuration")?;

    let cors = cors_for(&config)?;
    let cache = store::identity_cache(&config.cache);

    tracing::info!(
        provider = %config.provider_url,
        realm = %config.realm,
        api = %config.api_url,
        production = config.production,
        "starting gateway"
    );

    let gateway = GatewayServer::builder()
        .config(config)
        .identity_cache(cache)
        .build()
        .into_diagnostic()
        .wrap_err("failed to build gateway")?;

    let app = gateway.router().layer(cors);

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .into_diagnostic()
        .wrap_err("invalid BIND_ADDR")?;

    tracing::info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .into_diagnostic()
        .wrap_err("server error")?;

    Ok(())
}

/// Only the frontend origin may call the gateway, with cookies.
fn cors_for(config: &GatewayConfig) -> miette::Result<CorsLayer> {
    let origin = HeaderValue::from_str(&config.app_url.origin().ascii_serialization())
        .into_diagnostic()
        .wrap_err("APP_URL is not a valid origin")?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]))
}
