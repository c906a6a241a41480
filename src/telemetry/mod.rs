//! # Telemetry Module
//!
//! Ground-side sinks that look inside the relayed MAVLink frames.
//!
//! This module handles:
//! - Formatting frames as JSONL (JSON Lines) records
//! - Writing to rotating log files (max N records per file, last M files kept)
//! - Tracking per-vehicle state for dashboards

pub mod recorder;
pub mod vehicle;

pub use recorder::{FrameRecord, JsonlRecorder};
pub use vehicle::{LinkStatus, VehicleMonitor, VehicleState, VehicleStateSink};
