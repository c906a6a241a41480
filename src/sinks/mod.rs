//! # Downstream Sinks
//!
//! Consumers of the relayed telemetry on the ground. Each registered sink
//! gets its own writer task fed from a drop-oldest backlog, so sinks never
//! wait on each other.

pub mod channel;
pub mod udp;

pub use channel::ChannelSink;
pub use udp::UdpForwardSink;

use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ground::backlog::BacklogReceiver;
use crate::session::TelemetryFrame;
use crate::stats::{bump, SinkCounters};

/// A downstream consumer of telemetry frames
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Name used in logs and counters
    fn name(&self) -> &str;

    /// Deliver one frame
    ///
    /// An error is final: the sink is deregistered and receives nothing more.
    async fn deliver(&mut self, frame: TelemetryFrame) -> Result<()>;
}

/// Drain `backlog` into `sink` until the backlog closes or delivery fails
pub(crate) async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut backlog: BacklogReceiver<TelemetryFrame>,
    counters: Arc<SinkCounters>,
) {
    while let Some(frame) = backlog.recv().await {
        match sink.deliver(frame).await {
            Ok(()) => bump(&counters.delivered),
            Err(e) => {
                warn!("Sink '{}' failed, deregistering: {}", sink.name(), e);
                return;
            }
        }
    }

    debug!(
        delivered = counters.delivered.load(Ordering::Relaxed),
        dropped = counters.dropped.load(Ordering::Relaxed),
        "Sink '{}' writer finished",
        sink.name()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::ground::backlog::backlog;
    use crate::session::SessionId;
    use bytes::Bytes;

    fn frame(seq: u64) -> TelemetryFrame {
        TelemetryFrame::new(SessionId::from_raw(1), seq, Bytes::from_static(&[0xFE]))
    }

    #[tokio::test]
    async fn test_writer_delivers_until_closed() {
        let mut sink = MockFrameSink::new();
        sink.expect_name().return_const("mock".to_string());
        sink.expect_deliver().times(3).returning(|_| Ok(()));

        let (tx, rx) = backlog(8);
        for seq in 0..3 {
            tx.push(frame(seq));
        }
        drop(tx);

        let counters = Arc::new(SinkCounters::default());
        run_writer(Box::new(sink), rx, Arc::clone(&counters)).await;
        assert_eq!(counters.snapshot().delivered, 3);
    }

    #[tokio::test]
    async fn test_writer_stops_on_failure() {
        let mut sink = MockFrameSink::new();
        sink.expect_name().return_const("flaky".to_string());
        sink.expect_deliver()
            .withf(|f| f.sequence() == 0)
            .times(1)
            .returning(|_| Ok(()));
        sink.expect_deliver()
            .withf(|f| f.sequence() == 1)
            .times(1)
            .returning(|_| {
                Err(RelayError::Sink {
                    name: "flaky".to_string(),
                    reason: "gone".to_string(),
                })
            });

        let (tx, rx) = backlog(8);
        for seq in 0..4 {
            tx.push(frame(seq));
        }

        let counters = Arc::new(SinkCounters::default());
        run_writer(Box::new(sink), rx, Arc::clone(&counters)).await;

        assert_eq!(counters.snapshot().delivered, 1);
        // Receiver is gone, so the demultiplexer sees the sink as closed
        assert!(matches!(
            tx.push(frame(9)),
            crate::ground::backlog::Pushed::Closed(_)
        ));
    }
}
