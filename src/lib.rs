//! # UAV Relay Library
//!
//! Relay MAVLink telemetry from a flight controller to ground consumers over
//! an intermittent cellular link.
//!
//! The same library runs on both ends. The airborne relay frames the serial
//! stream, numbers it per flight session and keeps unacknowledged frames for
//! replay; the ground relay deduplicates and fans the stream out to sinks.

pub mod air;
pub mod config;
pub mod error;
pub mod ground;
pub mod logging;
pub mod mavlink;
pub mod serial;
pub mod session;
pub mod sinks;
pub mod source;
pub mod stats;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use config::{Config, Role};
use stats::RelayStats;

/// Run the relay for the configured role until `cancel` fires and the
/// pipeline has drained
pub async fn run(config: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let stats = RelayStats::new();
    let stats_cancel = cancel.child_token();
    let stats_task = tokio::spawn(stats::log_periodically(
        Arc::clone(&stats),
        Duration::from_millis(config.stats.log_interval_ms),
        stats_cancel.clone(),
    ));

    info!(role = ?config.relay.role, "Starting relay");
    let result = match config.relay.role {
        Role::Air => air::run(config, Arc::clone(&stats), cancel).await,
        Role::Ground => ground::run(config, Arc::clone(&stats), cancel).await,
    };

    stats_cancel.cancel();
    let _ = stats_task.await;
    result
}
