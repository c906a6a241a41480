//! # Sessions and Frames
//!
//! A [`Session`] is one continuous epoch of sequence numbering. Sequence
//! numbers start at zero in every session and only mean something together
//! with the session id, so frames always carry both.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// Position of a frame within its session
pub type SequenceNumber = u64;

/// Random, non-zero identifier of one flight/connection epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Draw a fresh random id
    pub fn generate() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One continuous epoch of telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Start a new session now
    pub fn start() -> Self {
        Self {
            id: SessionId::generate(),
            started_at: Utc::now(),
        }
    }

    /// Rebuild a session announced by the peer
    pub fn from_parts(id: SessionId, started_at: DateTime<Utc>) -> Self {
        Self { id, started_at }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// One framed telemetry message with its place in a session
///
/// Immutable once created. The payload is reference counted, so clones for
/// the replay buffer and the transport share one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryFrame {
    session: SessionId,
    sequence: SequenceNumber,
    payload: Bytes,
}

impl TelemetryFrame {
    pub fn new(session: SessionId, sequence: SequenceNumber, payload: Bytes) -> Self {
        Self {
            session,
            sequence,
            payload,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
