//! # Uplink Task
//!
//! Sole owner of the replay buffer and the airborne transport. Frames from
//! the multiplexer are buffered and sent; acknowledgements trim the buffer;
//! every reconnect replays the unacknowledged backlog in order before new
//! frames are taken from the queue.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::multiplexer::UplinkCommand;
use super::replay::ReplayBuffer;
use crate::error::Result;
use crate::session::{Session, TelemetryFrame};
use crate::stats::{bump, RelayStats};
use crate::transport::{Dialer, ReconnectingTransport, TransportEvent, WireMessage};

pub struct Uplink<D: Dialer> {
    transport: ReconnectingTransport<D>,
    replay: ReplayBuffer,
    session: Option<Session>,
    drain_timeout: Duration,
    stats: Arc<RelayStats>,
}

impl<D: Dialer> Uplink<D> {
    /// `drain_timeout` bounds how long the task keeps waiting for
    /// acknowledgements once its input has closed.
    pub fn new(
        transport: ReconnectingTransport<D>,
        replay: ReplayBuffer,
        drain_timeout: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            transport,
            replay,
            session: None,
            drain_timeout,
            stats,
        }
    }

    /// Run until the command queue closes and the backlog is drained
    pub async fn run(mut self, mut commands: mpsc::Receiver<UplinkCommand>) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                event = self.transport.next_event() => self.on_transport_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn on_command(&mut self, command: UplinkCommand) {
        match command {
            UplinkCommand::StartSession(session) => {
                let flushed = self.replay.flush();
                if flushed > 0 {
                    info!(flushed, "Discarded unacknowledged frames of the previous session");
                }
                self.session = Some(session);

                if self.transport.is_connected() {
                    if let Err(e) = self.transport.send(WireMessage::hello(&session)).await {
                        debug!("Hello deferred: {}", e);
                    }
                }
            }
            UplinkCommand::Frame(frame) => {
                let evicted = self.replay.enqueue(frame.clone());
                if evicted > 0 {
                    self.stats
                        .replay_evictions
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                }

                if self.transport.is_connected() {
                    self.send_frame(frame, false).await;
                }
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Reconnected => self.retransmit().await,
            TransportEvent::Received(WireMessage::Ack { session, seq }) => {
                bump(&self.stats.acks_received);
                if self.session.map(|s| s.id()) == Some(session) {
                    let acked = self.replay.ack_through(seq);
                    debug!(seq, acked, pending = self.replay.len(), "Ground acknowledged");
                } else {
                    debug!(%session, "Ignoring acknowledgement for another session");
                }
            }
            TransportEvent::Received(other) => {
                debug!("Unexpected message from ground: {}", other);
            }
            TransportEvent::Disconnected(reason) => {
                warn!(
                    pending = self.replay.len(),
                    "Uplink interrupted ({}), buffering frames", reason
                );
            }
        }
    }

    /// Announce the session, then resend the whole unacknowledged backlog
    async fn retransmit(&mut self) {
        let Some(session) = self.session else {
            return;
        };

        if self.transport.send(WireMessage::hello(&session)).await.is_err() {
            return;
        }

        let backlog = self.replay.snapshot_for_retransmit();
        if !backlog.is_empty() {
            info!(
                frames = backlog.len(),
                from = backlog[0].sequence(),
                "Retransmitting unacknowledged frames"
            );
        }

        for entry in backlog {
            if !self.send_frame(entry.frame, true).await {
                break;
            }
        }
    }

    async fn send_frame(&mut self, frame: TelemetryFrame, retransmit: bool) -> bool {
        match self.transport.send(WireMessage::Data(frame)).await {
            Ok(()) => {
                if retransmit {
                    bump(&self.stats.frames_retransmitted);
                } else {
                    bump(&self.stats.frames_sent);
                }
                true
            }
            Err(e) => {
                debug!("Frame kept for replay: {}", e);
                false
            }
        }
    }

    /// Keep serving the link until everything is acknowledged or time is up
    async fn drain(&mut self) {
        if self.replay.is_empty() {
            info!("Uplink finished, nothing left to deliver");
            return;
        }

        info!(pending = self.replay.len(), "Uplink draining unacknowledged frames");
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        while !self.replay.is_empty() {
            tokio::select! {
                event = self.transport.next_event() => self.on_transport_event(event).await,
                _ = &mut deadline => {
                    warn!(pending = self.replay.len(), "Uplink stopped with unacknowledged frames");
                    return;
                }
            }
        }

        info!("Uplink finished, all frames acknowledged");
    }
}
