//! # Airborne Relay
//!
//! Source Adapter → Session Multiplexer → Uplink (Replay Buffer + transport).
//!
//! Each stage is its own task and the stages talk over bounded queues.
//! Shutdown flows downstream: the source stops on cancellation, which closes
//! the multiplexer input, which closes the uplink input, which drains.

pub mod multiplexer;
pub mod replay;
pub mod uplink;

pub use multiplexer::{SessionMultiplexer, UplinkCommand};
pub use replay::{ReplayBuffer, ReplayEntry};
pub use uplink::Uplink;

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, TransportMode};
use crate::serial::SerialOpener;
use crate::source::SourceAdapter;
use crate::stats::RelayStats;
use crate::transport::{Dialer, ReconnectingTransport, TcpAcceptor, TcpDialer, TransportSettings};

/// Depth of the queues between pipeline stages
const STAGE_QUEUE_DEPTH: usize = 64;

/// Run the airborne pipeline until cancelled and drained
pub async fn run(config: &Config, stats: Arc<RelayStats>, cancel: CancellationToken) -> anyhow::Result<()> {
    let transport = &config.transport;
    match transport.mode_for(config.relay.role) {
        TransportMode::Dial => {
            let dialer = TcpDialer::new(transport.peer_address.clone(), transport.connect_timeout());
            run_with(config, dialer, stats, cancel).await
        }
        TransportMode::Listen => {
            let acceptor = TcpAcceptor::bind(&transport.listen_address)
                .await
                .with_context(|| format!("binding {}", transport.listen_address))?;
            run_with(config, acceptor, stats, cancel).await
        }
    }
}

async fn run_with<D: Dialer>(
    config: &Config,
    dialer: D,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (source_tx, source_rx) = mpsc::channel(STAGE_QUEUE_DEPTH);
    let (uplink_tx, uplink_rx) = mpsc::channel(STAGE_QUEUE_DEPTH);

    let transport = ReconnectingTransport::new(
        dialer,
        TransportSettings::from_config(&config.transport, &config.framing),
        Arc::clone(&stats),
    );
    let uplink = Uplink::new(
        transport,
        ReplayBuffer::from_config(&config.replay),
        config.transport.liveness_timeout(),
        Arc::clone(&stats),
    );
    let uplink_task = tokio::spawn(uplink.run(uplink_rx));

    let multiplexer = SessionMultiplexer::start(uplink_tx).await?;
    let mux_task = tokio::spawn(multiplexer.run(source_rx, config.session.on_source_close));

    let adapter = SourceAdapter::new(
        SerialOpener::from_config(&config.serial),
        &config.serial,
        &config.framing,
        Arc::clone(&stats),
    );
    let source_task = tokio::spawn(adapter.run(source_tx, cancel));

    info!("Airborne relay running");

    source_task.await?;
    mux_task.await??;
    uplink_task.await??;

    info!("Airborne relay stopped");
    Ok(())
}
