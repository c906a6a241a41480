//! # Downlink Task
//!
//! Sole owner of the ground transport. Inbound frames go to the
//! demultiplexer; a cumulative acknowledgement of the highest sequence seen
//! in the current session goes back to the air relay every `every_frames`
//! frames or every `interval_ms`, whichever comes first.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::demux::DemuxHandle;
use crate::config::AckConfig;
use crate::error::Result;
use crate::session::{SequenceNumber, SessionId, TelemetryFrame};
use crate::stats::{bump, RelayStats};
use crate::transport::{Dialer, ReconnectingTransport, TransportEvent, WireMessage};

/// Acknowledgement watermark for the current session
#[derive(Debug, Default)]
pub struct AckTracker {
    session: Option<SessionId>,
    highest: Option<SequenceNumber>,
    acked: Option<SequenceNumber>,
    since_ack: u64,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Start tracking `session` from scratch
    pub fn reset(&mut self, session: SessionId) {
        self.session = Some(session);
        self.highest = None;
        self.acked = None;
        self.since_ack = 0;
    }

    /// Record a received frame; returns `false` if it belongs to another session
    pub fn observe(&mut self, frame: &TelemetryFrame) -> bool {
        if self.session.is_none() {
            self.reset(frame.session());
        }
        if self.session != Some(frame.session()) {
            return false;
        }

        let seq = frame.sequence();
        if self.highest.map_or(true, |highest| seq > highest) {
            self.highest = Some(seq);
            self.since_ack += 1;
        }
        true
    }

    /// Frames observed since the last acknowledgement went out
    pub fn unacked(&self) -> u64 {
        self.since_ack
    }

    /// The acknowledgement to send, if the watermark moved
    pub fn pending(&self) -> Option<(SessionId, SequenceNumber)> {
        let session = self.session?;
        let highest = self.highest?;
        match self.acked {
            Some(acked) if acked >= highest => None,
            _ => Some((session, highest)),
        }
    }

    pub fn mark_sent(&mut self, seq: SequenceNumber) {
        self.acked = Some(seq);
        self.since_ack = 0;
    }

    /// Make the current watermark pending again
    pub fn force(&mut self) {
        self.acked = None;
    }
}

pub struct Downlink<D: Dialer> {
    transport: ReconnectingTransport<D>,
    demux: DemuxHandle,
    acks: AckTracker,
    ack_interval: Duration,
    ack_every: u64,
    stats: Arc<RelayStats>,
}

impl<D: Dialer> Downlink<D> {
    pub fn new(
        transport: ReconnectingTransport<D>,
        demux: DemuxHandle,
        ack: &AckConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            transport,
            demux,
            acks: AckTracker::new(),
            ack_interval: Duration::from_millis(ack.interval_ms),
            ack_every: ack.every_frames,
            stats,
        }
    }

    /// Run until cancelled
    ///
    /// Fails only if the demultiplexer has gone away.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.ack_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                event = self.transport.next_event() => self.on_transport_event(event).await?,
                _ = ticker.tick() => self.send_ack().await,
            }
        }

        // Last chance to trim the air relay's backlog before going away
        self.send_ack().await;
        info!("Downlink stopped");
        Ok(())
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Reconnected => {
                info!("Air relay connected");
            }
            TransportEvent::Received(WireMessage::Data(frame)) => {
                bump(&self.stats.frames_received);
                let tracked = self.acks.observe(&frame);
                self.demux.route(frame).await?;

                if tracked && self.acks.unacked() >= self.ack_every {
                    self.send_ack().await;
                }
            }
            TransportEvent::Received(message @ WireMessage::Hello { .. }) => {
                if let Some(session) = message.announced_session() {
                    self.on_hello(session.id()).await;
                    self.demux.announce(session).await?;
                }
            }
            TransportEvent::Received(other) => {
                debug!("Unexpected message from air relay: {}", other);
            }
            TransportEvent::Disconnected(reason) => {
                warn!("Air relay disconnected: {}", reason);
            }
        }
        Ok(())
    }

    async fn on_hello(&mut self, session: SessionId) {
        if self.acks.session() == Some(session) {
            // Same session after a reconnect: tell the air relay where we are
            debug!(%session, "Air relay resumed session");
            self.acks.force();
            self.send_ack().await;
        } else {
            info!(%session, "Air relay announced session");
            self.acks.reset(session);
        }
    }

    async fn send_ack(&mut self) {
        let Some((session, seq)) = self.acks.pending() else {
            return;
        };

        match self.transport.send(WireMessage::Ack { session, seq }).await {
            Ok(()) => {
                bump(&self.stats.acks_sent);
                self.acks.mark_sent(seq);
                trace!(%session, seq, "Acknowledged");
            }
            Err(e) => trace!("Acknowledgement deferred: {}", e),
        }
    }
}
