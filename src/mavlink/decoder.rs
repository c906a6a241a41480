//! # MAVLink Stream Decoder
//!
//! Splits a raw serial byte stream into complete MAVLink frames.
//!
//! The decoder never waits for a "perfect" stream: bytes that cannot start a
//! frame are skipped, and a candidate frame that fails validation costs only
//! its start marker, so a genuine frame hiding inside it is still found.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use super::crc::mavlink_crc;
use super::protocol::*;

/// Default read-ahead allocation for the decode buffer
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Outcome of inspecting the bytes at the head of the buffer
#[derive(Debug, PartialEq, Eq)]
enum Candidate {
    /// Not enough bytes yet to decide
    Incomplete,
    /// A valid frame of the given length
    Valid(usize),
    /// Not a frame; reason for the log
    Corrupt(&'static str),
}

/// Incremental MAVLink frame decoder
///
/// # Examples
///
/// ```
/// use uav_relay::mavlink::decoder::FrameDecoder;
/// use uav_relay::mavlink::encoder::{encode_v1, FrameAddress};
///
/// let frame = encode_v1(FrameAddress::new(0, 1, 1), 0, &[0u8; 9]).unwrap();
///
/// let mut decoder = FrameDecoder::new(280, true);
/// decoder.push(&[0x00, 0x42]); // line noise
/// decoder.push(&frame);
///
/// assert_eq!(decoder.next_frame().unwrap().as_ref(), &frame[..]);
/// assert_eq!(decoder.corrupt_frames(), 1);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
    accept_unknown_messages: bool,
    corrupt_frames: u64,
    discarded_bytes: u64,
    resyncing: bool,
}

impl FrameDecoder {
    /// Create a decoder
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Frames longer than this are length overflows
    /// * `accept_unknown_messages` - Pass frames without a known `CRC_EXTRA` on structure alone
    pub fn new(max_frame_size: usize, accept_unknown_messages: bool) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame_size,
            accept_unknown_messages,
            corrupt_frames: 0,
            discarded_bytes: 0,
            resyncing: false,
        }
    }

    /// Append raw bytes read from the device
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self
                .buffer
                .iter()
                .position(|&b| b == MAVLINK_STX_V1 || b == MAVLINK_STX_V2)
            {
                Some(0) => {}
                Some(offset) => self.discard(offset),
                None => {
                    let len = self.buffer.len();
                    if len > 0 {
                        self.discard(len);
                    }
                    return None;
                }
            }

            match self.inspect() {
                Candidate::Incomplete => return None,
                Candidate::Valid(len) => {
                    self.resyncing = false;
                    return Some(self.buffer.split_to(len).freeze());
                }
                Candidate::Corrupt(reason) => {
                    debug!("Discarding corrupt MAVLink candidate: {}", reason);
                    self.discard(1);
                }
            }
        }
    }

    /// Iterate over every complete frame currently buffered
    pub fn frames(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::from_fn(move || self.next_frame())
    }

    /// Drop buffered bytes after the underlying stream closed
    ///
    /// A partial frame left behind is counted as discarded.
    pub fn reset(&mut self) {
        let len = self.buffer.len();
        if len > 0 {
            self.discard(len);
        }
        self.resyncing = false;
    }

    /// Number of resynchronisations (malformed frames or line noise)
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Number of bytes thrown away while resynchronising
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn discard(&mut self, n: usize) {
        if !self.resyncing {
            self.resyncing = true;
            self.corrupt_frames += 1;
        }
        self.discarded_bytes += n as u64;
        self.buffer.advance(n);
        trace!("Discarded {} bytes while resynchronising", n);
    }

    fn inspect(&self) -> Candidate {
        let buf = &self.buffer[..];

        if buf[0] == MAVLINK_STX_V2 && buf.len() >= 3 && buf[2] & !MAVLINK_IFLAG_SIGNED != 0 {
            return Candidate::Corrupt("unsupported incompatibility flags");
        }

        let header = match FrameHeader::parse(buf) {
            Some(header) => header,
            None => return Candidate::Incomplete,
        };

        let frame_len = header.frame_len();
        if frame_len > self.max_frame_size {
            return Candidate::Corrupt("length overflow");
        }
        if buf.len() < frame_len {
            return Candidate::Incomplete;
        }

        let crc_end = header.header_len() + header.payload_len as usize;
        let received = u16::from_le_bytes([buf[crc_end], buf[crc_end + 1]]);

        match crc_extra(header.message_id) {
            Some(extra) => {
                if mavlink_crc(&buf[1..crc_end], extra) == received {
                    Candidate::Valid(frame_len)
                } else {
                    Candidate::Corrupt("checksum mismatch")
                }
            }
            None if self.accept_unknown_messages => Candidate::Valid(frame_len),
            None => Candidate::Corrupt("unknown message id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_v1, encode_v2, FrameAddress};

    fn heartbeat(seq: u8) -> Vec<u8> {
        encode_v1(FrameAddress::new(seq, 1, 1), MSG_ID_HEARTBEAT, &[seq; 9]).unwrap()
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        let a = heartbeat(1);
        let b = encode_v2(FrameAddress::new(2, 1, 1), MSG_ID_VFR_HUD, &[7u8; 20]).unwrap();
        decoder.push(&a);
        decoder.push(&b);

        let frames: Vec<Bytes> = decoder.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), &a[..]);
        assert_eq!(frames[1].as_ref(), &b[..]);
        assert_eq!(decoder.corrupt_frames(), 0);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_split_across_reads() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        let frame = heartbeat(4);

        decoder.push(&frame[..5]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&frame[5..12]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&frame[12..]);
        assert_eq!(decoder.next_frame().unwrap().as_ref(), &frame[..]);
    }

    #[test]
    fn test_checksum_mismatch_resyncs_to_next_frame() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        let mut bad = heartbeat(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = heartbeat(2);

        decoder.push(&bad);
        decoder.push(&good);

        assert_eq!(decoder.next_frame().unwrap().as_ref(), &good[..]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.corrupt_frames(), 1);
        assert_eq!(decoder.discarded_bytes(), bad.len() as u64);
    }

    #[test]
    fn test_length_overflow_is_corrupt() {
        let mut decoder = FrameDecoder::new(20, true);
        let big = encode_v2(FrameAddress::new(0, 1, 1), MSG_ID_ATTITUDE, &[b'a'; 50]).unwrap();
        let good = heartbeat(9);

        decoder.push(&big);
        decoder.push(&good);

        assert_eq!(decoder.next_frame().unwrap().as_ref(), &good[..]);
        assert_eq!(decoder.corrupt_frames(), 1);
    }

    #[test]
    fn test_unknown_incompat_flags_are_corrupt() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        let mut frame = encode_v2(FrameAddress::new(0, 1, 1), MSG_ID_HEARTBEAT, &[1u8; 9]).unwrap();
        frame[2] = 0x02;
        decoder.push(&frame);

        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.corrupt_frames(), 1);
    }

    #[test]
    fn test_unknown_message_policy() {
        let frame = encode_v2(FrameAddress::new(0, 1, 1), 42_000, &[1, 2, 3]).unwrap();

        let mut lenient = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        lenient.push(&frame);
        assert!(lenient.next_frame().is_some());

        let mut strict = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, false);
        strict.push(&frame);
        assert!(strict.next_frame().is_none());
        assert_eq!(strict.corrupt_frames(), 1);
    }

    #[test]
    fn test_noise_run_counts_once() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        decoder.push(&[0x01, 0x02, 0x03, 0x04]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&[0x05, 0x06]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&heartbeat(0));
        assert!(decoder.next_frame().is_some());

        assert_eq!(decoder.corrupt_frames(), 1);
        assert_eq!(decoder.discarded_bytes(), 6);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut decoder = FrameDecoder::new(MAVLINK_MAX_FRAME_LEN, true);
        let frame = heartbeat(3);
        decoder.push(&frame[..8]);
        assert!(decoder.next_frame().is_none());

        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.discarded_bytes(), 8);

        decoder.push(&frame);
        assert!(decoder.next_frame().is_some());
    }
}
