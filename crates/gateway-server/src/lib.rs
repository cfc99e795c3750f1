//! HTTP surface for the composite fossil-occurrence query gateway: request
//! routing, CLI configuration, and process wiring. The composite query
//! engine itself lives in `gateway_core`.

mod args;
mod error;
mod handlers;
mod render;

pub use args::Args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

/// Shared, read-only across every request.
pub struct AppState {
    pub http: reqwest::Client,
    pub paleo_base_url: url::Url,
    pub quaternary_base_url: url::Url,
    pub timeout: Duration,
    pub retries: u32,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!("starting fossil occurrence gateway");

    let state = Arc::new(AppState {
        http: reqwest::Client::new(),
        paleo_base_url: args.paleo_base_url,
        quaternary_base_url: args.quaternary_base_url,
        timeout: Duration::from_secs(args.composite_timeout_secs),
        retries: args.retries,
    });

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .context("binding to port")?;

    tracing::info!(port = args.port, "fossil occurrence gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("shutdown signal received, stopping server");
}
