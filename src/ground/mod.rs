//! # Ground Relay
//!
//! Transport → Downlink → Ground Demultiplexer → per-sink backlogs → sink writers.
//!
//! Shutdown: cancellation stops the downlink, which drops the last
//! demultiplexer handle; the demultiplexer then closes every backlog and
//! waits for the writers to deliver what is queued.

pub mod backlog;
pub mod demux;
pub mod downlink;

pub use demux::{DemuxHandle, GroundDemultiplexer, SinkHandle, SinkId, SinkRegistry};
pub use downlink::{AckTracker, Downlink};

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, SinksConfig, TransportMode};
use crate::sinks::UdpForwardSink;
use crate::stats::{self, RelayStats};
use crate::telemetry::{JsonlRecorder, VehicleStateSink};
use crate::transport::{Dialer, ReconnectingTransport, TcpAcceptor, TcpDialer, TransportSettings};

/// Depth of the demultiplexer command queue
const DEMUX_QUEUE_DEPTH: usize = 256;

/// Run the ground pipeline until cancelled and drained
pub async fn run(config: &Config, stats: Arc<RelayStats>, cancel: CancellationToken) -> anyhow::Result<()> {
    let transport = &config.transport;
    match transport.mode_for(config.relay.role) {
        TransportMode::Listen => {
            let acceptor = TcpAcceptor::bind(&transport.listen_address)
                .await
                .with_context(|| format!("binding {}", transport.listen_address))?;
            run_with(config, acceptor, stats, cancel).await
        }
        TransportMode::Dial => {
            let dialer = TcpDialer::new(transport.peer_address.clone(), transport.connect_timeout());
            run_with(config, dialer, stats, cancel).await
        }
    }
}

async fn run_with<D: Dialer>(
    config: &Config,
    dialer: D,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let demux = GroundDemultiplexer::new(config.sinks.backlog_capacity, Arc::clone(&stats));
    let (handle, demux_task) = DemuxHandle::spawn(demux, DEMUX_QUEUE_DEPTH);

    let period = Duration::from_millis(config.stats.log_interval_ms);
    let monitors = cancel.child_token();
    let sinks = register_sinks(&config.sinks, &handle, period, &monitors).await?;
    let sink_stats = tokio::spawn(stats::log_sinks_periodically(sinks, period, monitors.clone()));

    let transport = ReconnectingTransport::new(
        dialer,
        TransportSettings::from_config(&config.transport, &config.framing),
        Arc::clone(&stats),
    );
    let downlink = Downlink::new(transport, handle, &config.ack, stats);

    info!("Ground relay running");
    let result = downlink.run(cancel).await;
    demux_task.await?;
    monitors.cancel();
    let _ = sink_stats.await;
    result?;

    info!("Ground relay stopped");
    Ok(())
}

/// Register every sink enabled in the configuration
///
/// Background summaries started for a sink stop when `monitors` is cancelled.
async fn register_sinks(
    sinks: &SinksConfig,
    demux: &DemuxHandle,
    summary_period: Duration,
    monitors: &CancellationToken,
) -> anyhow::Result<Vec<SinkHandle>> {
    let mut handles = Vec::new();

    for udp in &sinks.udp {
        let sink = UdpForwardSink::bind(udp.name.clone(), &udp.address)
            .await
            .with_context(|| format!("udp sink '{}'", udp.name))?;
        handles.push(demux.register(Box::new(sink)).await?);
    }

    if sinks.recorder.enabled {
        let recorder = JsonlRecorder::new("recorder", &sinks.recorder);
        info!("Recording telemetry under {}", recorder.dir().display());
        handles.push(demux.register(Box::new(recorder)).await?);
    }

    if sinks.vehicle_state.enabled {
        let timeout = Duration::from_millis(sinks.vehicle_state.heartbeat_timeout_ms);
        let (sink, monitor) = VehicleStateSink::new("vehicle_state", timeout);
        handles.push(demux.register(Box::new(sink)).await?);
        tokio::spawn(monitor.log_periodically(summary_period, monitors.clone()));
    }

    if handles.is_empty() {
        warn!("No sinks configured, received telemetry will be discarded");
    }
    Ok(handles)
}
