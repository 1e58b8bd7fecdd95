//! # Presence Hub
//!
//! Presence registry with entity capabilities negotiation.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! presence-hub
//!
//! # Serve a domain on a custom port
//! PRESENCE_DOMAIN=jackal.im PRESENCE_PORT=8080 presence-hub
//! ```
//!
//! Settings are read from `presence-hub.toml` when present.

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "presence_hub=debug,presence_hub_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting presence hub for {} on {}:{}",
        config.domain,
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
