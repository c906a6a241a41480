//! # Replay Buffer
//!
//! Bounded FIFO of frames handed to the transport but not yet acknowledged
//! by the ground relay. On reconnect the whole unacknowledged backlog is
//! retransmitted, oldest first, before any new frame goes out.
//!
//! When full, the oldest entry is evicted: live telemetry favours freshness
//! over completeness.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ReplayConfig;
use crate::session::{SequenceNumber, TelemetryFrame};

/// One frame awaiting acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub frame: TelemetryFrame,
    /// When the frame was first handed to the transport
    pub sent_at: Instant,
}

impl ReplayEntry {
    pub fn sequence(&self) -> SequenceNumber {
        self.frame.sequence()
    }
}

#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<ReplayEntry>,
    capacity: usize,
    max_age: Option<Duration>,
    evictions: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
            evictions: 0,
        }
    }

    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.capacity, config.max_age_ms.map(Duration::from_millis))
    }

    /// Store a frame, evicting the oldest entries if needed
    ///
    /// Returns how many entries were evicted (capacity or age).
    pub fn enqueue(&mut self, frame: TelemetryFrame) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        if let Some(max_age) = self.max_age {
            while let Some(front) = self.entries.front() {
                if now.duration_since(front.sent_at) <= max_age {
                    break;
                }
                self.entries.pop_front();
                evicted += 1;
            }
        }

        while self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                debug!(seq = oldest.sequence(), "Replay buffer full, evicting oldest frame");
            }
            evicted += 1;
        }

        self.entries.push_back(ReplayEntry { frame, sent_at: now });
        self.evictions += evicted as u64;
        evicted
    }

    /// Drop every entry with sequence `<= seq`
    ///
    /// Returns how many entries were acknowledged.
    pub fn ack_through(&mut self, seq: SequenceNumber) -> usize {
        let mut acked = 0;
        while let Some(front) = self.entries.front() {
            if front.sequence() > seq {
                break;
            }
            self.entries.pop_front();
            acked += 1;
        }
        acked
    }

    /// Unacknowledged entries, oldest first
    pub fn snapshot_for_retransmit(&self) -> Vec<ReplayEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Drop all entries on a session change; not counted as evictions
    pub fn flush(&mut self) -> usize {
        let flushed = self.entries.len();
        self.entries.clear();
        flushed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
