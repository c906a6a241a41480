//! # MAVLink Protocol Constants and Types
//!
//! Framing definitions for MAVLink v1 and v2.
//!
//! ```text
//! v1: STX(0xFE) LEN SEQ SYS COMP MSGID            PAYLOAD CRC_LO CRC_HI
//! v2: STX(0xFD) LEN INC CMP SEQ SYS COMP MSGID*3  PAYLOAD CRC_LO CRC_HI [SIGNATURE*13]
//! ```

/// MAVLink v1 start marker
pub const MAVLINK_STX_V1: u8 = 0xFE;

/// MAVLink v2 start marker
pub const MAVLINK_STX_V2: u8 = 0xFD;

/// v1 header: stx + len + seq + sysid + compid + msgid
pub const MAVLINK_V1_HEADER_LEN: usize = 6;

/// v2 header: stx + len + incompat + compat + seq + sysid + compid + msgid(3)
pub const MAVLINK_V2_HEADER_LEN: usize = 10;

/// Checksum trailer size
pub const MAVLINK_CHECKSUM_LEN: usize = 2;

/// v2 signature block size
pub const MAVLINK_SIGNATURE_LEN: usize = 13;

/// Incompatibility flag: frame is signed
pub const MAVLINK_IFLAG_SIGNED: u8 = 0x01;

/// Largest possible frame: signed v2 with a 255-byte payload
pub const MAVLINK_MAX_FRAME_LEN: usize =
    MAVLINK_V2_HEADER_LEN + 255 + MAVLINK_CHECKSUM_LEN + MAVLINK_SIGNATURE_LEN;

/// Common-dialect message ids used by the ground side
pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_ATTITUDE: u32 = 30;
pub const MSG_ID_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_ID_VFR_HUD: u32 = 74;
pub const MSG_ID_STATUSTEXT: u32 = 253;

/// `CRC_EXTRA` seeds for the common dialect, sorted by message id
const CRC_EXTRA_TABLE: &[(u32, u8)] = &[
    (0, 50),    // HEARTBEAT
    (1, 124),   // SYS_STATUS
    (2, 137),   // SYSTEM_TIME
    (4, 237),   // PING
    (22, 220),  // PARAM_VALUE
    (24, 24),   // GPS_RAW_INT
    (27, 144),  // RAW_IMU
    (29, 115),  // SCALED_PRESSURE
    (30, 39),   // ATTITUDE
    (31, 246),  // ATTITUDE_QUATERNION
    (32, 185),  // LOCAL_POSITION_NED
    (33, 104),  // GLOBAL_POSITION_INT
    (35, 244),  // RC_CHANNELS_RAW
    (36, 222),  // SERVO_OUTPUT_RAW
    (42, 28),   // MISSION_CURRENT
    (62, 183),  // NAV_CONTROLLER_OUTPUT
    (65, 118),  // RC_CHANNELS
    (74, 20),   // VFR_HUD
    (76, 152),  // COMMAND_LONG
    (77, 143),  // COMMAND_ACK
    (109, 185), // RADIO_STATUS
    (111, 34),  // TIMESYNC
    (147, 154), // BATTERY_STATUS
    (148, 178), // AUTOPILOT_VERSION
    (241, 90),  // VIBRATION
    (242, 104), // HOME_POSITION
    (245, 130), // EXTENDED_SYS_STATE
    (253, 83),  // STATUSTEXT
];

/// Look up the `CRC_EXTRA` seed for a message id
///
/// Returns `None` for messages outside the built-in table; those frames can
/// only be checked structurally.
pub fn crc_extra(msg_id: u32) -> Option<u8> {
    CRC_EXTRA_TABLE
        .binary_search_by_key(&msg_id, |&(id, _)| id)
        .ok()
        .map(|idx| CRC_EXTRA_TABLE[idx].1)
}

/// MAVLink wire version
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MavlinkVersion {
    V1,
    V2,
}

/// Header fields of a complete MAVLink frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MavlinkVersion,
    pub payload_len: u8,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
    pub signed: bool,
}

impl FrameHeader {
    /// Parse the header of a complete frame
    ///
    /// Only the header is inspected; checksum validation is the decoder's job.
    /// Returns `None` if the bytes do not start with a full header.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        match *frame.first()? {
            MAVLINK_STX_V1 if frame.len() >= MAVLINK_V1_HEADER_LEN => Some(Self {
                version: MavlinkVersion::V1,
                payload_len: frame[1],
                sequence: frame[2],
                system_id: frame[3],
                component_id: frame[4],
                message_id: frame[5] as u32,
                signed: false,
            }),
            MAVLINK_STX_V2 if frame.len() >= MAVLINK_V2_HEADER_LEN => Some(Self {
                version: MavlinkVersion::V2,
                payload_len: frame[1],
                sequence: frame[4],
                system_id: frame[5],
                component_id: frame[6],
                message_id: u32::from_le_bytes([frame[7], frame[8], frame[9], 0]),
                signed: frame[2] & MAVLINK_IFLAG_SIGNED != 0,
            }),
            _ => None,
        }
    }

    /// Header length for this version
    pub fn header_len(&self) -> usize {
        match self.version {
            MavlinkVersion::V1 => MAVLINK_V1_HEADER_LEN,
            MavlinkVersion::V2 => MAVLINK_V2_HEADER_LEN,
        }
    }

    /// Total frame length implied by the header
    pub fn frame_len(&self) -> usize {
        let signature = if self.signed { MAVLINK_SIGNATURE_LEN } else { 0 };
        self.header_len() + self.payload_len as usize + MAVLINK_CHECKSUM_LEN + signature
    }

    /// Payload slice of a complete frame
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let start = self.header_len();
        let end = (start + self.payload_len as usize).min(frame.len());
        &frame[start.min(end)..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(MAVLINK_STX_V1, 0xFE);
        assert_eq!(MAVLINK_STX_V2, 0xFD);
        assert_eq!(MAVLINK_MAX_FRAME_LEN, 280);
    }

    #[test]
    fn test_crc_extra_table_is_sorted() {
        assert!(CRC_EXTRA_TABLE.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_crc_extra_lookup() {
        assert_eq!(crc_extra(MSG_ID_HEARTBEAT), Some(50));
        assert_eq!(crc_extra(MSG_ID_GLOBAL_POSITION_INT), Some(104));
        assert_eq!(crc_extra(MSG_ID_VFR_HUD), Some(20));
        assert_eq!(crc_extra(60_000), None);
    }

    #[test]
    fn test_parse_v1_header() {
        let frame = [MAVLINK_STX_V1, 9, 7, 1, 1, 0];
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.version, MavlinkVersion::V1);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.frame_len(), 17);
    }

    #[test]
    fn test_parse_v2_signed_header() {
        let frame = [MAVLINK_STX_V2, 3, 0x01, 0, 2, 1, 1, 0x21, 0x01, 0x00];
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.version, MavlinkVersion::V2);
        assert_eq!(header.message_id, 0x121);
        assert!(header.signed);
        assert_eq!(header.frame_len(), 10 + 3 + 2 + 13);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FrameHeader::parse(&[]).is_none());
        assert!(FrameHeader::parse(&[0x55, 1, 2, 3, 4, 5]).is_none());
        assert!(FrameHeader::parse(&[MAVLINK_STX_V2, 1, 0]).is_none());
    }
}
