//! # Relay Counters
//!
//! Monitoring counters shared between pipeline tasks. Each counter has a
//! single writer task; readers only take snapshots for logging.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ground::SinkHandle;

/// Pipeline-wide counters
#[derive(Debug, Default)]
pub struct RelayStats {
    pub corrupt_frames: AtomicU64,
    pub discarded_bytes: AtomicU64,
    pub replay_evictions: AtomicU64,
    pub reconnects: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_retransmitted: AtomicU64,
    pub frames_received: AtomicU64,
    pub stale_session_frames: AtomicU64,
    pub acks_sent: AtomicU64,
    pub acks_received: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub corrupt_frames: u64,
    pub discarded_bytes: u64,
    pub replay_evictions: u64,
    pub reconnects: u64,
    pub frames_sent: u64,
    pub frames_retransmitted: u64,
    pub frames_received: u64,
    pub stale_session_frames: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
}

impl RelayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            replay_evictions: self.replay_evictions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_retransmitted: self.frames_retransmitted.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            stale_session_frames: self.stale_session_frames.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
        }
    }
}

/// Increment a counter by one
#[inline]
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Per-sink delivery counters
#[derive(Debug, Default)]
pub struct SinkCounters {
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
    pub duplicates: AtomicU64,
}

/// Point-in-time copy of [`SinkCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkSnapshot {
    pub delivered: u64,
    pub dropped: u64,
    pub duplicates: u64,
}

impl SinkCounters {
    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Log a stats snapshot at a fixed interval until cancelled
pub async fn log_periodically(stats: Arc<RelayStats>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    corrupt = s.corrupt_frames,
                    discarded_bytes = s.discarded_bytes,
                    evicted = s.replay_evictions,
                    reconnects = s.reconnects,
                    sent = s.frames_sent,
                    retransmitted = s.frames_retransmitted,
                    received = s.frames_received,
                    stale = s.stale_session_frames,
                    acks_sent = s.acks_sent,
                    acks_received = s.acks_received,
                    "Relay statistics"
                );
            }
        }
    }

    info!(stats = %to_json(&stats.snapshot()), "Final relay statistics");
}

/// Log delivery counters for each sink at a fixed interval until cancelled
///
/// Counters of a sink that was removed keep their final values.
pub async fn log_sinks_periodically(sinks: Vec<SinkHandle>, period: Duration, cancel: CancellationToken) {
    if sinks.is_empty() {
        return;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => log_sinks(&sinks),
        }
    }

    for sink in &sinks {
        info!(sink = %sink.name, counters = %to_json(&sink.counters.snapshot()), "Final sink statistics");
    }
}

fn log_sinks(sinks: &[SinkHandle]) {
    for sink in sinks {
        let s = sink.counters.snapshot();
        info!(
            sink = %sink.name,
            delivered = s.delivered,
            dropped = s.dropped,
            duplicates = s.duplicates,
            "Sink statistics"
        );
    }
}

/// One-line JSON for log collectors
fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("unserializable: {}", e))
}
