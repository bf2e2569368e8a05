//! # Chargewatch
//!
//! Watches charging stations for free piles.
//!
//! ## Usage
//!
//! ```bash
//! # Run with ./chargewatch.toml or a default path
//! chargewatch
//!
//! # Run with a specific config file
//! CHARGEWATCH_CONFIG=/path/to/chargewatch.toml chargewatch
//!
//! # Run with environment variables only
//! CHARGEWATCH_UPSTREAM_HOST=https://api.example.com CHARGEWATCH_OPENID=... \
//!     CHARGEWATCH_PHONENUMBER=... chargewatch
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chargewatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        upstream = %config.upstream.host,
        watches = config.watches.len(),
        "Starting chargewatch"
    );

    handlers::run_server(config).await?;

    Ok(())
}
