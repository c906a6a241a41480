//! # MAVLink Framing Module
//!
//! Implementation of the MAVLink v1/v2 framing the flight controller speaks.
//!
//! This module handles:
//! - Frame synchronisation on the 0xFE / 0xFD start markers
//! - CRC-16/MCRF4XX checksum validation with per-message `CRC_EXTRA`
//! - Length and flag validation, resynchronisation after corruption
//! - Decoding the messages the ground station summarises per vehicle

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod messages;
