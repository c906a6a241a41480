//! # CRC-16/MCRF4XX Implementation
//!
//! The "X.25" checksum MAVLink appends to every frame.
//!
//! **Polynomial**: 0x1021, processed reflected (0x8408)
//! **Initial Value**: 0xFFFF
//! **Final XOR**: none

/// Reflected CRC-16-CCITT polynomial
const CRC16_POLY_REFLECTED: u16 = 0x8408;

/// Initial accumulator value
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed lookup table
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Running MAVLink checksum
///
/// # Examples
///
/// ```
/// use uav_relay::mavlink::crc::X25Crc;
///
/// let mut crc = X25Crc::new();
/// crc.accumulate_slice(b"123456789");
/// assert_eq!(crc.value(), 0x6F91);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X25Crc(u16);

impl X25Crc {
    pub fn new() -> Self {
        Self(CRC16_INIT)
    }

    /// Feed one byte
    #[inline]
    pub fn accumulate(&mut self, byte: u8) {
        self.0 = (self.0 >> 8) ^ CRC16_TABLE[((self.0 ^ byte as u16) & 0xFF) as usize];
    }

    /// Feed a byte slice
    pub fn accumulate_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.accumulate(byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl Default for X25Crc {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a MAVLink frame body followed by its `CRC_EXTRA` seed
///
/// # Arguments
///
/// * `data` - Frame bytes after the start marker, up to the end of the payload
/// * `crc_extra` - Per-message seed byte from the dialect definition
pub fn mavlink_crc(data: &[u8], crc_extra: u8) -> u16 {
    let mut crc = X25Crc::new();
    crc.accumulate_slice(data);
    crc.accumulate(crc_extra);
    crc.value()
}

/// Bitwise form of the MAVLink accumulate step, used to check the table.
#[allow(dead_code)]
fn accumulate_slow(crc: u16, byte: u8) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = tmp as u16;
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}
