//! # MAVLink Frame Encoder
//!
//! Builds complete, checksummed MAVLink frames. The relay itself forwards
//! frames untouched; the encoder serves tooling and tests that need valid
//! traffic.

use super::crc::mavlink_crc;
use super::protocol::*;
use crate::error::{RelayError, Result};

/// Addressing fields shared by both frame versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAddress {
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
}

impl FrameAddress {
    pub fn new(sequence: u8, system_id: u8, component_id: u8) -> Self {
        Self {
            sequence,
            system_id,
            component_id,
        }
    }
}

/// Encode a MAVLink v1 frame
///
/// # Errors
///
/// Returns error if the payload exceeds 255 bytes or the message id does not
/// fit in one byte.
///
/// # Examples
///
/// ```
/// use uav_relay::mavlink::encoder::{encode_v1, FrameAddress};
///
/// let frame = encode_v1(FrameAddress::new(0, 1, 1), 0, &[0u8; 9]).unwrap();
/// assert_eq!(frame.len(), 17);
/// assert_eq!(frame[0], 0xFE);
/// ```
pub fn encode_v1(address: FrameAddress, message_id: u32, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > 255 {
        return Err(RelayError::Protocol(format!(
            "Payload size {} exceeds maximum 255",
            payload.len()
        )));
    }
    if message_id > 0xFF {
        return Err(RelayError::Protocol(format!(
            "Message id {} does not fit a v1 frame",
            message_id
        )));
    }

    let mut frame = Vec::with_capacity(MAVLINK_V1_HEADER_LEN + payload.len() + MAVLINK_CHECKSUM_LEN);
    frame.push(MAVLINK_STX_V1);
    frame.push(payload.len() as u8);
    frame.push(address.sequence);
    frame.push(address.system_id);
    frame.push(address.component_id);
    frame.push(message_id as u8);
    frame.extend_from_slice(payload);

    push_checksum(&mut frame, message_id);
    Ok(frame)
}

/// Encode an unsigned MAVLink v2 frame
///
/// Trailing zero bytes of the payload are truncated as the v2 wire format
/// requires (the first payload byte is always kept).
pub fn encode_v2(address: FrameAddress, message_id: u32, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > 255 {
        return Err(RelayError::Protocol(format!(
            "Payload size {} exceeds maximum 255",
            payload.len()
        )));
    }
    if message_id > 0x00FF_FFFF {
        return Err(RelayError::Protocol(format!(
            "Message id {} does not fit 24 bits",
            message_id
        )));
    }

    let mut len = payload.len();
    while len > 1 && payload[len - 1] == 0 {
        len -= 1;
    }
    let payload = &payload[..len];

    let id = message_id.to_le_bytes();
    let mut frame = Vec::with_capacity(MAVLINK_V2_HEADER_LEN + len + MAVLINK_CHECKSUM_LEN);
    frame.push(MAVLINK_STX_V2);
    frame.push(len as u8);
    frame.push(0); // incompat flags
    frame.push(0); // compat flags
    frame.push(address.sequence);
    frame.push(address.system_id);
    frame.push(address.component_id);
    frame.extend_from_slice(&id[..3]);
    frame.extend_from_slice(payload);

    push_checksum(&mut frame, message_id);
    Ok(frame)
}

/// Append the checksum over everything after the start marker
fn push_checksum(frame: &mut Vec<u8>, message_id: u32) {
    let crc = mavlink_crc(&frame[1..], crc_extra(message_id).unwrap_or(0));
    frame.extend_from_slice(&crc.to_le_bytes());
}
