//! # MAVLink Message Decoding
//!
//! Decodes the handful of common-dialect messages the ground station tracks
//! for its vehicle overview (position, speed, GPS, battery, heartbeat).
//!
//! MAVLink v2 senders strip trailing zero bytes from payloads, so every
//! payload is zero-extended to its full length before fields are read.

use super::protocol::*;

/// Full (untruncated) payload lengths
const HEARTBEAT_LEN: usize = 9;
const SYS_STATUS_LEN: usize = 31;
const GPS_RAW_INT_LEN: usize = 30;
const GLOBAL_POSITION_INT_LEN: usize = 28;
const VFR_HUD_LEN: usize = 20;

/// Heading value meaning "unknown" in GLOBAL_POSITION_INT
const HEADING_UNKNOWN: u16 = u16::MAX;

/// HEARTBEAT (#0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

/// SYS_STATUS (#1), battery fields only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysStatus {
    /// Battery voltage in millivolts, 0 when unknown
    pub voltage_battery_mv: u16,
    /// Battery current in centi-amperes, -1 when unknown
    pub current_battery_ca: i16,
    /// Remaining battery in percent, -1 when unknown
    pub battery_remaining: i8,
}

/// GPS_RAW_INT (#24), fix quality fields only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsRaw {
    pub fix_type: u8,
    pub satellites_visible: u8,
}

/// GLOBAL_POSITION_INT (#33)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalPosition {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude above mean sea level in meters
    pub altitude_msl: f32,
    /// Altitude above home in meters
    pub relative_altitude: f32,
    /// Heading in degrees, `None` when the autopilot does not know it
    pub heading: Option<f32>,
}

/// VFR_HUD (#74)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VfrHud {
    pub airspeed: f32,
    /// Ground speed in m/s
    pub ground_speed: f32,
    pub altitude: f32,
    pub climb_rate: f32,
    pub heading: i16,
    pub throttle: u16,
}

/// Decoded message of interest to the ground station
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryMessage {
    Heartbeat(Heartbeat),
    SysStatus(SysStatus),
    GpsRaw(GpsRaw),
    GlobalPosition(GlobalPosition),
    VfrHud(VfrHud),
}

/// Zero-extended little-endian payload view
struct Payload<const N: usize>([u8; N]);

impl<const N: usize> Payload<N> {
    fn new(raw: &[u8]) -> Self {
        let mut buf = [0u8; N];
        let len = raw.len().min(N);
        buf[..len].copy_from_slice(&raw[..len]);
        Self(buf)
    }

    fn u8(&self, at: usize) -> u8 {
        self.0[at]
    }

    fn i8(&self, at: usize) -> i8 {
        self.0[at] as i8
    }

    fn u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.0[at], self.0[at + 1]])
    }

    fn i16(&self, at: usize) -> i16 {
        i16::from_le_bytes([self.0[at], self.0[at + 1]])
    }

    fn u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }

    fn i32(&self, at: usize) -> i32 {
        i32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }

    fn f32(&self, at: usize) -> f32 {
        f32::from_bits(self.u32(at))
    }
}

/// Decode a complete MAVLink frame into a message the ground station tracks
///
/// Returns `None` for messages outside that set or for bytes that do not
/// carry a MAVLink header. The frame is assumed to have passed checksum
/// validation already.
pub fn decode_message(frame: &[u8]) -> Option<(FrameHeader, TelemetryMessage)> {
    let header = FrameHeader::parse(frame)?;
    let raw = header.payload(frame);

    let message = match header.message_id {
        MSG_ID_HEARTBEAT => TelemetryMessage::Heartbeat(decode_heartbeat(raw)),
        MSG_ID_SYS_STATUS => TelemetryMessage::SysStatus(decode_sys_status(raw)),
        MSG_ID_GPS_RAW_INT => TelemetryMessage::GpsRaw(decode_gps_raw(raw)),
        MSG_ID_GLOBAL_POSITION_INT => TelemetryMessage::GlobalPosition(decode_global_position(raw)),
        MSG_ID_VFR_HUD => TelemetryMessage::VfrHud(decode_vfr_hud(raw)),
        _ => return None,
    };

    Some((header, message))
}

pub fn decode_heartbeat(raw: &[u8]) -> Heartbeat {
    let p = Payload::<HEARTBEAT_LEN>::new(raw);
    Heartbeat {
        custom_mode: p.u32(0),
        vehicle_type: p.u8(4),
        autopilot: p.u8(5),
        base_mode: p.u8(6),
        system_status: p.u8(7),
        mavlink_version: p.u8(8),
    }
}

pub fn decode_sys_status(raw: &[u8]) -> SysStatus {
    let p = Payload::<SYS_STATUS_LEN>::new(raw);
    SysStatus {
        voltage_battery_mv: p.u16(14),
        current_battery_ca: p.i16(16),
        battery_remaining: p.i8(30),
    }
}

pub fn decode_gps_raw(raw: &[u8]) -> GpsRaw {
    let p = Payload::<GPS_RAW_INT_LEN>::new(raw);
    GpsRaw {
        fix_type: p.u8(28),
        satellites_visible: p.u8(29),
    }
}

pub fn decode_global_position(raw: &[u8]) -> GlobalPosition {
    let p = Payload::<GLOBAL_POSITION_INT_LEN>::new(raw);
    let hdg = p.u16(26);
    GlobalPosition {
        latitude: p.i32(4) as f64 / 10_000_000.0,
        longitude: p.i32(8) as f64 / 10_000_000.0,
        altitude_msl: p.i32(12) as f32 / 1000.0,
        relative_altitude: p.i32(16) as f32 / 1000.0,
        heading: (hdg != HEADING_UNKNOWN).then(|| hdg as f32 / 100.0),
    }
}

pub fn decode_vfr_hud(raw: &[u8]) -> VfrHud {
    let p = Payload::<VFR_HUD_LEN>::new(raw);
    VfrHud {
        airspeed: p.f32(0),
        ground_speed: p.f32(4),
        altitude: p.f32(8),
        climb_rate: p.f32(12),
        heading: p.i16(16),
        throttle: p.u16(18),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_v1, encode_v2, FrameAddress};

    #[test]
    fn test_decode_heartbeat() {
        // custom_mode=4 (GUIDED), type=2 (quad), autopilot=3 (ArduPilot), base_mode=0x81
        let payload = [4, 0, 0, 0, 2, 3, 0x81, 4, 3];
        let frame = encode_v1(FrameAddress::new(0, 7, 1), MSG_ID_HEARTBEAT, &payload).unwrap();

        let (header, message) = decode_message(&frame).unwrap();
        assert_eq!(header.system_id, 7);
        match message {
            TelemetryMessage::Heartbeat(hb) => {
                assert_eq!(hb.custom_mode, 4);
                assert_eq!(hb.vehicle_type, 2);
                assert_eq!(hb.autopilot, 3);
                assert_eq!(hb.base_mode, 0x81);
                assert_eq!(hb.system_status, 4);
            }
            other => panic!("Expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_global_position() {
        let mut payload = [0u8; GLOBAL_POSITION_INT_LEN];
        payload[4..8].copy_from_slice(&557_558_000i32.to_le_bytes()); // 55.7558
        payload[8..12].copy_from_slice(&376_173_000i32.to_le_bytes()); // 37.6173
        payload[16..20].copy_from_slice(&120_500i32.to_le_bytes()); // 120.5 m
        payload[26..28].copy_from_slice(&9_000u16.to_le_bytes()); // 90 deg

        let position = decode_global_position(&payload);
        assert!((position.latitude - 55.7558).abs() < 1e-6);
        assert!((position.longitude - 37.6173).abs() < 1e-6);
        assert!((position.relative_altitude - 120.5).abs() < 0.01);
        assert_eq!(position.heading, Some(90.0));
    }

    #[test]
    fn test_unknown_heading() {
        let mut payload = [0u8; GLOBAL_POSITION_INT_LEN];
        payload[26..28].copy_from_slice(&u16::MAX.to_le_bytes());
        assert_eq!(decode_global_position(&payload).heading, None);
    }

    #[test]
    fn test_decode_sys_status_battery() {
        let mut payload = [0u8; SYS_STATUS_LEN];
        payload[14..16].copy_from_slice(&12_345u16.to_le_bytes());
        payload[16..18].copy_from_slice(&(-1i16).to_le_bytes());
        payload[30] = 76;

        let status = decode_sys_status(&payload);
        assert_eq!(status.voltage_battery_mv, 12_345);
        assert_eq!(status.current_battery_ca, -1);
        assert_eq!(status.battery_remaining, 76);
    }

    #[test]
    fn test_decode_gps_raw() {
        let mut payload = [0u8; GPS_RAW_INT_LEN];
        payload[28] = 3;
        payload[29] = 14;
        let gps = decode_gps_raw(&payload);
        assert_eq!(gps.fix_type, 3);
        assert_eq!(gps.satellites_visible, 14);
    }

    #[test]
    fn test_decode_truncated_v2_payload() {
        let mut payload = [0u8; VFR_HUD_LEN];
        payload[4..8].copy_from_slice(&12.5f32.to_le_bytes());
        let frame = encode_v2(FrameAddress::new(0, 1, 1), MSG_ID_VFR_HUD, &payload).unwrap();
        assert!(frame[1] < VFR_HUD_LEN as u8);

        match decode_message(&frame).unwrap().1 {
            TelemetryMessage::VfrHud(hud) => {
                assert_eq!(hud.ground_speed, 12.5);
                assert_eq!(hud.throttle, 0);
            }
            other => panic!("Expected VFR_HUD, got {:?}", other),
        }
    }

    #[test]
    fn test_untracked_message_is_skipped() {
        let frame = encode_v1(FrameAddress::new(0, 1, 1), MSG_ID_ATTITUDE, &[1u8; 28]).unwrap();
        assert!(decode_message(&frame).is_none());
    }
}
