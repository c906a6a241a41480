//! # UAV Relay
//!
//! Airborne or ground half of the telemetry relay, selected by `relay.role`
//! in the configuration file.
//!
//! # Usage
//!
//! ```bash
//! uav-relay config/relay.toml
//! RUST_LOG=uav_relay=debug uav-relay config/ground.toml
//! ```
//!
//! Ctrl+C stops reading the source, drains what is in flight and exits.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use uav_relay::config::Config;

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&path).with_context(|| format!("loading {}", path))?;

    let _guard = uav_relay::logging::init(&config.logging)?;
    info!("UAV Relay v{} starting with {}", env!("CARGO_PKG_VERSION"), path);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                signal_cancel.cancel();
            }
            Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
        }
    });

    if let Err(e) = uav_relay::run(&config, cancel).await {
        error!("Relay failed: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
