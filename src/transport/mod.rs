//! # Reconnecting Transport
//!
//! Owns the single logical connection between the air and ground relays and
//! keeps it alive across tunnel dropouts.
//!
//! ```text
//!            dial ok                     silence / read error / send error
//! Connecting ───────► Connected ─────────────────────────────────┐
//!     ▲   │                                                       ▼
//!     │   └──────────── dial error ─────────────────────────► Backoff
//!     └────────────────── delay elapsed ───────────────────────────┘
//! ```
//!
//! Both relays run the same state machine; only the [`Dialer`] differs.
//! Heartbeats come from an independent timer task, inbound silence longer
//! than the liveness timeout drops the connection.

pub mod backoff;
pub mod dialer;
pub mod wire;

pub use backoff::Backoff;
pub use dialer::{Dialer, TcpAcceptor, TcpDialer};
pub use wire::{RelayCodec, WireMessage};

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior, Sleep};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::config::{FramingConfig, TransportConfig};
use crate::error::{RelayError, Result};
use crate::stats::{bump, RelayStats};

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Backoff,
}

/// What the owner of the transport gets to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fresh connection is up; previous in-flight data may be lost
    Reconnected,
    /// Inbound message other than a heartbeat
    Received(WireMessage),
    /// The connection was torn down and the transport is backing off
    Disconnected(String),
}

/// Timing and sizing for one transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub max_payload: usize,
    pub backoff: Backoff,
}

impl TransportSettings {
    pub fn from_config(transport: &TransportConfig, framing: &FramingConfig) -> Self {
        Self {
            heartbeat_interval: transport.heartbeat_interval(),
            liveness_timeout: transport.liveness_timeout(),
            max_payload: framing.max_frame_size,
            backoff: Backoff::from_config(transport),
        }
    }
}

enum Link<C> {
    Connecting(BoxFuture<'static, io::Result<C>>),
    Connected {
        framed: Framed<C, RelayCodec>,
        since: Instant,
        liveness: Pin<Box<Sleep>>,
    },
    Backoff(Pin<Box<Sleep>>),
}

enum Step {
    Inbound(Option<Result<WireMessage>>),
    Silent,
    HeartbeatDue,
}

/// Connection to the peer relay that re-establishes itself
pub struct ReconnectingTransport<D: Dialer> {
    dialer: D,
    link: Link<D::Conn>,
    codec: RelayCodec,
    backoff: Backoff,
    liveness_timeout: Duration,
    heartbeats: mpsc::Receiver<()>,
    heartbeat_task: JoinHandle<()>,
    pending: Option<TransportEvent>,
    has_connected: bool,
    stats: Arc<RelayStats>,
}

impl<D: Dialer> ReconnectingTransport<D> {
    /// Create the transport and start the first connection attempt
    ///
    /// Must be called from within a Tokio runtime: the heartbeat timer is
    /// spawned here.
    pub fn new(dialer: D, settings: TransportSettings, stats: Arc<RelayStats>) -> Self {
        let (tick_tx, heartbeats) = mpsc::channel(1);
        let heartbeat_task = tokio::spawn(heartbeat_timer(settings.heartbeat_interval, tick_tx));

        debug!("Connecting to relay peer {}", dialer.peer());
        let link = Link::Connecting(dialer.dial());

        Self {
            dialer,
            link,
            codec: RelayCodec::new(settings.max_payload),
            backoff: settings.backoff,
            liveness_timeout: settings.liveness_timeout,
            heartbeats,
            heartbeat_task,
            pending: None,
            has_connected: false,
            stats,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.link {
            Link::Connecting(_) => ConnectionState::Connecting,
            Link::Connected { .. } => ConnectionState::Connected,
            Link::Backoff(_) => ConnectionState::Backoff,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Drive the state machine until something happens
    ///
    /// Cancel safe: every in-progress dial, delay and read lives in `self`,
    /// so dropping this future inside `select!` loses nothing.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.pending.take() {
                return event;
            }

            match &mut self.link {
                Link::Connecting(dial) => {
                    let result = dial.await;
                    match result {
                        Ok(conn) => return self.on_connected(conn),
                        Err(e) => {
                            warn!("Connection attempt to {} failed: {}", self.dialer.peer(), e);
                            self.enter_backoff();
                        }
                    }
                }
                Link::Backoff(delay) => {
                    delay.as_mut().await;
                    debug!("Reconnecting to relay peer {}", self.dialer.peer());
                    self.link = Link::Connecting(self.dialer.dial());
                }
                Link::Connected { framed, liveness, .. } => {
                    // Buffered inbound data wins over an expired deadline
                    let step = tokio::select! {
                        biased;
                        inbound = framed.next() => Step::Inbound(inbound),
                        Some(()) = self.heartbeats.recv() => Step::HeartbeatDue,
                        _ = liveness.as_mut() => Step::Silent,
                    };

                    match step {
                        Step::Inbound(Some(Ok(WireMessage::Heartbeat))) => {
                            trace!("Heartbeat from peer");
                            self.touch();
                        }
                        Step::Inbound(Some(Ok(message))) => {
                            self.touch();
                            return TransportEvent::Received(message);
                        }
                        Step::Inbound(Some(Err(e))) => {
                            self.drop_connection(format!("protocol error: {}", e));
                        }
                        Step::Inbound(None) => {
                            self.drop_connection("peer closed the connection".to_string());
                        }
                        Step::Silent => {
                            let reason = format!("no traffic for {:?}", self.liveness_timeout);
                            self.drop_connection(reason);
                        }
                        Step::HeartbeatDue => {
                            if let Err(e) = self.send(WireMessage::Heartbeat).await {
                                debug!("Heartbeat not sent: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Send one message on the live connection
    ///
    /// Bounded by the liveness timeout. Any failure tears the connection
    /// down, queues a [`TransportEvent::Disconnected`] and is returned.
    pub async fn send(&mut self, message: WireMessage) -> Result<()> {
        let Link::Connected { framed, .. } = &mut self.link else {
            return Err(RelayError::NotConnected);
        };

        match timeout(self.liveness_timeout, framed.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.drop_connection(format!("send failed: {}", e));
                Err(e)
            }
            Err(_) => {
                self.drop_connection("send timed out".to_string());
                Err(RelayError::Wire("send timed out".to_string()))
            }
        }
    }

    fn on_connected(&mut self, conn: D::Conn) -> TransportEvent {
        if self.has_connected {
            bump(&self.stats.reconnects);
        }
        self.has_connected = true;

        info!("Relay link to {} established", self.dialer.peer());
        self.link = Link::Connected {
            framed: Framed::new(conn, self.codec),
            since: Instant::now(),
            liveness: Box::pin(sleep(self.liveness_timeout)),
        };
        TransportEvent::Reconnected
    }

    fn touch(&mut self) {
        if let Link::Connected { liveness, .. } = &mut self.link {
            liveness.as_mut().reset(Instant::now() + self.liveness_timeout);
        }
    }

    fn drop_connection(&mut self, reason: String) {
        if let Link::Connected { since, .. } = &self.link {
            let connected_for = since.elapsed();
            self.backoff.connection_lost(connected_for);
        }

        warn!("Relay link to {} lost: {}", self.dialer.peer(), reason);
        self.enter_backoff();
        self.pending = Some(TransportEvent::Disconnected(reason));
    }

    fn enter_backoff(&mut self) {
        let delay = self.backoff.next_wait();
        debug!(attempt = self.backoff.attempt(), "Next connection attempt in {:?}", delay);
        self.link = Link::Backoff(Box::pin(sleep(delay)));
    }
}

impl<D: Dialer> Drop for ReconnectingTransport<D> {
    fn drop(&mut self) {
        self.heartbeat_task.abort();
    }
}

/// Emit one tick per heartbeat period; ticks are dropped while one is pending
async fn heartbeat_timer(period: Duration, ticks: mpsc::Sender<()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match ticks.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => break,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::session::{SessionId, TelemetryFrame};
    use bytes::Bytes;

    fn data(seq: u64) -> WireMessage {
        WireMessage::Data(TelemetryFrame::new(
            SessionId::from_raw(1),
            seq,
            Bytes::from_static(&[0xFE, 0x00]),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_emits_reconnected_and_sends() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        assert_eq!(transport.connection_state(), ConnectionState::Connecting);

        let (conn, mut peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();

        assert_eq!(transport.next_event().await, TransportEvent::Reconnected);
        assert!(transport.is_connected());

        transport.send(data(0)).await.unwrap();
        assert_eq!(peer.next().await.unwrap().unwrap(), data(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_fails() {
        let (dialer, _attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());

        assert!(matches!(transport.send(data(0)).await, Err(RelayError::NotConnected)));
        assert_eq!(transport.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_are_swallowed() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        let (conn, mut peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        let ack = WireMessage::Ack { session: SessionId::from_raw(1), seq: 9 };
        peer.send(WireMessage::Heartbeat).await.unwrap();
        peer.send(ack.clone()).await.unwrap();

        assert_eq!(transport.next_event().await, TransportEvent::Received(ack));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_moves_to_backoff() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        let (conn, mut peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        let started = Instant::now();
        match transport.next_event().await {
            TransportEvent::Disconnected(reason) => assert!(reason.contains("no traffic")),
            other => panic!("Expected disconnect, got {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(transport.connection_state(), ConnectionState::Backoff);

        // Our heartbeats went out while the peer stayed quiet
        let mut heartbeats = 0;
        while let Some(Ok(message)) = peer.next().await {
            assert_eq!(message, WireMessage::Heartbeat);
            heartbeats += 1;
        }
        assert!(heartbeats >= 4, "only {} heartbeats", heartbeats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_traffic_keeps_link_alive() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        let (conn, mut peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        for seq in 0..5 {
            tokio::time::advance(Duration::from_secs(3)).await;
            let ack = WireMessage::Ack { session: SessionId::from_raw(1), seq };
            peer.send(ack.clone()).await.unwrap();
            assert_eq!(transport.next_event().await, TransportEvent::Received(ack));
        }
        assert!(transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_buffered_while_not_polled_keeps_link() {
        for _ in 0..20 {
            let (dialer, attempts) = scripted_dialer();
            let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
            let (conn, mut peer) = connection_pair();
            attempts.send(Ok(conn)).unwrap();
            transport.next_event().await;

            // Owner busy sending while the ack arrives inside the window
            tokio::time::advance(Duration::from_secs(1)).await;
            let ack = WireMessage::Ack { session: SessionId::from_raw(1), seq: 4 };
            peer.send(ack.clone()).await.unwrap();
            tokio::time::advance(Duration::from_secs(5)).await;

            assert_eq!(transport.next_event().await, TransportEvent::Received(ack));
            assert!(transport.is_connected());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failures_back_off_then_connect() {
        let (dialer, attempts) = scripted_dialer();
        let stats = RelayStats::new();
        let mut transport = ReconnectingTransport::new(dialer, settings(), Arc::clone(&stats));

        for _ in 0..3 {
            attempts
                .send(Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
                .unwrap();
        }
        let (conn, _peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();

        let started = Instant::now();
        assert_eq!(transport.next_event().await, TransportEvent::Reconnected);

        // 100 + 200 + 400 ms of backoff with jitter disabled
        assert!(started.elapsed() >= Duration::from_millis(700));
        assert_eq!(stats.snapshot().reconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_then_reconnect_is_counted() {
        let (dialer, attempts) = scripted_dialer();
        let stats = RelayStats::new();
        let mut transport = ReconnectingTransport::new(dialer, settings(), Arc::clone(&stats));

        let (conn, peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        drop(peer);
        assert!(matches!(transport.next_event().await, TransportEvent::Disconnected(_)));
        assert_eq!(transport.connection_state(), ConnectionState::Backoff);

        let (conn, _peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        assert_eq!(transport.next_event().await, TransportEvent::Reconnected);
        assert_eq!(stats.snapshot().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_surfaces_as_disconnect() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        let (conn, peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        drop(peer);
        assert!(transport.send(data(1)).await.is_err());
        assert_eq!(transport.connection_state(), ConnectionState::Backoff);
        assert!(matches!(transport.next_event().await, TransportEvent::Disconnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_event_is_cancel_safe() {
        let (dialer, attempts) = scripted_dialer();
        let mut transport = ReconnectingTransport::new(dialer, settings(), RelayStats::new());
        let (conn, mut peer) = connection_pair();
        attempts.send(Ok(conn)).unwrap();
        transport.next_event().await;

        // Abandon a few waits halfway
        for _ in 0..3 {
            let _ = timeout(Duration::from_millis(500), transport.next_event()).await;
        }

        let ack = WireMessage::Ack { session: SessionId::from_raw(1), seq: 3 };
        peer.send(ack.clone()).await.unwrap();
        assert_eq!(transport.next_event().await, TransportEvent::Received(ack));
    }
}
