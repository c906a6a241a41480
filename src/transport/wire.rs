//! # Relay Wire Protocol
//!
//! Length-prefixed messages exchanged between the air and ground relays.
//!
//! ```text
//! +---------+------+----------------+
//! | len u16 | kind | body           |
//! |  (BE)   |  u8  | (len - 1)      |
//! +---------+------+----------------+
//! ```
//!
//! | kind | message   | body                                   |
//! |------|-----------|----------------------------------------|
//! | 1    | Hello     | session u64, started_at_ms i64         |
//! | 2    | Data      | session u64, seq u64, MAVLink frame    |
//! | 3    | Ack       | session u64, seq u64                   |
//! | 4    | Heartbeat | (empty)                                |
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::RelayError;
use crate::mavlink::protocol::MAVLINK_MAX_FRAME_LEN;
use crate::session::{SequenceNumber, Session, SessionId, TelemetryFrame};

/// Size of the length prefix
const LEN_PREFIX: usize = 2;

const KIND_HELLO: u8 = 1;
const KIND_DATA: u8 = 2;
const KIND_ACK: u8 = 3;
const KIND_HEARTBEAT: u8 = 4;

const HELLO_BODY_LEN: usize = 16;
const DATA_HEADER_LEN: usize = 16;
const ACK_BODY_LEN: usize = 16;

/// Message exchanged between the relays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Announces the sender's current session
    Hello {
        session: SessionId,
        started_at_ms: i64,
    },
    /// One telemetry frame
    Data(TelemetryFrame),
    /// Highest sequence received in a session
    Ack {
        session: SessionId,
        seq: SequenceNumber,
    },
    Heartbeat,
}

impl WireMessage {
    /// Hello announcing `session`
    pub fn hello(session: &Session) -> Self {
        WireMessage::Hello {
            session: session.id(),
            started_at_ms: session.started_at().timestamp_millis(),
        }
    }

    /// Session carried by a Hello, `None` for other kinds
    pub fn announced_session(&self) -> Option<Session> {
        match self {
            WireMessage::Hello { session, started_at_ms } => {
                let started_at: DateTime<Utc> = Utc
                    .timestamp_millis_opt(*started_at_ms)
                    .single()
                    .unwrap_or_else(Utc::now);
                Some(Session::from_parts(*session, started_at))
            }
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Data(_) => "data",
            WireMessage::Ack { .. } => "ack",
            WireMessage::Heartbeat => "heartbeat",
        }
    }
}

/// Codec for [`WireMessage`]
///
/// Data payloads above `max_payload` are rejected in both directions.
#[derive(Debug, Clone, Copy)]
pub struct RelayCodec {
    max_payload: usize,
}

impl RelayCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Largest length prefix this codec accepts
    fn max_message_len(&self) -> usize {
        1 + DATA_HEADER_LEN + self.max_payload
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        Self::new(MAVLINK_MAX_FRAME_LEN)
    }
}

impl Decoder for RelayCodec {
    type Item = WireMessage;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len == 0 {
            return Err(RelayError::Wire("empty message".to_string()));
        }
        if len > self.max_message_len() {
            return Err(RelayError::Wire(format!(
                "message length {} exceeds limit {}",
                len,
                self.max_message_len()
            )));
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let mut body = src.split_to(len);
        let kind = body.get_u8();

        let message = match kind {
            KIND_HELLO => {
                expect_body(kind, &body, HELLO_BODY_LEN)?;
                WireMessage::Hello {
                    session: SessionId::from_raw(body.get_u64()),
                    started_at_ms: body.get_i64(),
                }
            }
            KIND_DATA => {
                if body.len() <= DATA_HEADER_LEN {
                    return Err(RelayError::Wire("data message without payload".to_string()));
                }
                let session = SessionId::from_raw(body.get_u64());
                let seq = body.get_u64();
                WireMessage::Data(TelemetryFrame::new(session, seq, body.freeze()))
            }
            KIND_ACK => {
                expect_body(kind, &body, ACK_BODY_LEN)?;
                WireMessage::Ack {
                    session: SessionId::from_raw(body.get_u64()),
                    seq: body.get_u64(),
                }
            }
            KIND_HEARTBEAT => {
                expect_body(kind, &body, 0)?;
                WireMessage::Heartbeat
            }
            other => {
                return Err(RelayError::Wire(format!("unknown message kind {}", other)));
            }
        };

        Ok(Some(message))
    }
}

fn expect_body(kind: u8, body: &BytesMut, expected: usize) -> Result<(), RelayError> {
    if body.len() != expected {
        return Err(RelayError::Wire(format!(
            "kind {} body is {} bytes, expected {}",
            kind,
            body.len(),
            expected
        )));
    }
    Ok(())
}

impl Encoder<WireMessage> for RelayCodec {
    type Error = RelayError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            WireMessage::Hello { session, started_at_ms } => {
                put_header(dst, KIND_HELLO, HELLO_BODY_LEN);
                dst.put_u64(session.as_u64());
                dst.put_i64(started_at_ms);
            }
            WireMessage::Data(frame) => {
                let payload: &Bytes = frame.payload();
                if payload.is_empty() || payload.len() > self.max_payload {
                    return Err(RelayError::Wire(format!(
                        "data payload of {} bytes outside 1..={}",
                        payload.len(),
                        self.max_payload
                    )));
                }
                put_header(dst, KIND_DATA, DATA_HEADER_LEN + payload.len());
                dst.put_u64(frame.session().as_u64());
                dst.put_u64(frame.sequence());
                dst.extend_from_slice(payload);
            }
            WireMessage::Ack { session, seq } => {
                put_header(dst, KIND_ACK, ACK_BODY_LEN);
                dst.put_u64(session.as_u64());
                dst.put_u64(seq);
            }
            WireMessage::Heartbeat => put_header(dst, KIND_HEARTBEAT, 0),
        }
        Ok(())
    }
}

fn put_header(dst: &mut BytesMut, kind: u8, body_len: usize) {
    dst.reserve(LEN_PREFIX + 1 + body_len);
    dst.put_u16((1 + body_len) as u16);
    dst.put_u8(kind);
}

impl std::fmt::Display for WireMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireMessage::Data(frame) => {
                write!(f, "data {}#{}", frame.session(), frame.sequence())
            }
            WireMessage::Ack { session, seq } => write!(f, "ack {}#{}", session, seq),
            WireMessage::Hello { session, .. } => write!(f, "hello {}", session),
            other => f.write_str(other.kind_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: WireMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        RelayCodec::default().encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_data_layout() {
        let frame = TelemetryFrame::new(SessionId::from_raw(0x0102), 7, Bytes::from_static(&[0xFE, 0x09]));
        let buf = encode(WireMessage::Data(frame));

        assert_eq!(&buf[..3], &[0x00, 19, KIND_DATA]);
        assert_eq!(&buf[3..11], &0x0102u64.to_be_bytes());
        assert_eq!(&buf[11..19], &7u64.to_be_bytes());
        assert_eq!(&buf[19..], &[0xFE, 0x09]);
    }

    #[test]
    fn test_decode_stream_of_messages() {
        let session = Session::start();
        let messages = vec![
            WireMessage::hello(&session),
            WireMessage::Data(TelemetryFrame::new(session.id(), 0, Bytes::from_static(b"abc"))),
            WireMessage::Heartbeat,
            WireMessage::Ack { session: session.id(), seq: 41 },
        ];

        let mut buf = BytesMut::new();
        let mut codec = RelayCodec::default();
        for msg in messages.clone() {
            codec.encode(msg, &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            decoded.push(msg);
        }
        assert_eq!(decoded, messages);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_message_waits_for_more() {
        let full = encode(WireMessage::Ack { session: SessionId::from_raw(1), seq: 2 });
        let mut codec = RelayCodec::default();

        let mut buf = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[5..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(WireMessage::Ack { session: SessionId::from_raw(1), seq: 2 })
        );
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x09][..]);
        assert!(matches!(RelayCodec::default().decode(&mut buf), Err(RelayError::Wire(_))));
    }

    #[test]
    fn test_truncated_hello_body_is_error() {
        let mut buf = BytesMut::from(&[0x00, 0x05, KIND_HELLO, 0, 0, 0, 0][..]);
        assert!(RelayCodec::default().decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_length_rejected_before_buffering() {
        let mut codec = RelayCodec::new(16);
        let mut buf = BytesMut::from(&[0x01, 0x00, KIND_DATA][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_payload_not_encoded() {
        let frame = TelemetryFrame::new(SessionId::from_raw(1), 0, Bytes::from(vec![0u8; 17]));
        let mut buf = BytesMut::new();
        assert!(RelayCodec::new(16).encode(WireMessage::Data(frame), &mut buf).is_err());
    }

    #[test]
    fn test_hello_carries_session_start() {
        let session = Session::start();
        let announced = WireMessage::hello(&session).announced_session().unwrap();
        assert_eq!(announced.id(), session.id());
        assert_eq!(
            announced.started_at().timestamp_millis(),
            session.started_at().timestamp_millis()
        );
        assert!(WireMessage::Heartbeat.announced_session().is_none());
    }
}
