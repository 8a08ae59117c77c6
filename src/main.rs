//! Query broker HTTP server.
//!
//! Reads configuration from the environment (and `.env` if present), starts
//! the broker, and serves `/query`, `/result`, `/health`, and `/stats` until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use prometheus_query_broker::builders::build_openai_broker;
use prometheus_query_broker::config::BrokerConfig;
use prometheus_query_broker::core::AppResult;
use prometheus_query_broker::runtime::serve;
use prometheus_query_broker::util::init_tracing;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if dotenv.is_err() {
        info!("No .env file found, using process environment");
    }

    let config = BrokerConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    let addr = config.listen_addr.clone();

    let broker = Arc::new(build_openai_broker(config).context("failed to start broker")?);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, broker, shutdown_signal())
        .await
        .context("server error")?;

    info!("Query broker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
