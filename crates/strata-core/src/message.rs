//! Message protocol — the closed set of frames nodes exchange.
//!
//! Every message carries a sender and target address followed by
//! variant-specific fields, and travels as exactly one wire frame.
//! Decoding dispatches on the header's kind tag; an unknown tag is a
//! protocol error surfaced to the caller, never a crash.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::AsBytes;

use crate::wire::{
    self, FrameHeader, WireError, HEADER_LEN, MAX_FRAME,
};

/// Message kind tag carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgKind {
    /// Generic acknowledgement. Also answers a stored Put and a Get miss.
    Ack = 0x01,
    /// Store a blob under a key name on the receiving (home) node.
    Put = 0x02,
    /// Fetch a blob; the receiver answers immediately (Value or Ack miss).
    Get = 0x03,
    /// Fetch a blob; the receiver holds the request until the value exists.
    WaitGet = 0x04,
    /// Reply to Get/WaitGet carrying the blob.
    Value = 0x05,
    /// Peer → rendezvous: declare identity (listening address + node index).
    Register = 0x06,
    /// Rendezvous → peer: full membership snapshot, replaces the old view.
    Directory = 0x07,
    /// Rendezvous → peer: orderly shutdown signal.
    Kill = 0x08,
    /// Peer → rendezvous: job-finished signal for the completion barrier.
    Complete = 0x09,
}

impl TryFrom<u8> for MsgKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(MsgKind::Ack),
            0x02 => Ok(MsgKind::Put),
            0x03 => Ok(MsgKind::Get),
            0x04 => Ok(MsgKind::WaitGet),
            0x05 => Ok(MsgKind::Value),
            0x06 => Ok(MsgKind::Register),
            0x07 => Ok(MsgKind::Directory),
            0x08 => Ok(MsgKind::Kill),
            0x09 => Ok(MsgKind::Complete),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<MsgKind> for u8 {
    fn from(k: MsgKind) -> u8 {
        k as u8
    }
}

/// Variant-specific payload. Messages are values: once sent, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ack,
    Put { key_name: String, blob: Bytes },
    Get { key_name: String },
    WaitGet { key_name: String },
    Value { blob: Bytes },
    Register { node_index: u32 },
    Directory { addresses: Vec<String>, node_indexes: Vec<u32> },
    Kill,
    Complete,
}

impl Payload {
    pub fn kind(&self) -> MsgKind {
        match self {
            Payload::Ack => MsgKind::Ack,
            Payload::Put { .. } => MsgKind::Put,
            Payload::Get { .. } => MsgKind::Get,
            Payload::WaitGet { .. } => MsgKind::WaitGet,
            Payload::Value { .. } => MsgKind::Value,
            Payload::Register { .. } => MsgKind::Register,
            Payload::Directory { .. } => MsgKind::Directory,
            Payload::Kill => MsgKind::Kill,
            Payload::Complete => MsgKind::Complete,
        }
    }
}

/// One protocol message: common header fields plus the variant payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Address of the sending node.
    pub sender: String,
    /// Address of the intended receiver.
    pub target: String,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: impl Into<String>, target: impl Into<String>, payload: Payload) -> Self {
        Self {
            sender: sender.into(),
            target: target.into(),
            payload,
        }
    }

    pub fn kind(&self) -> MsgKind {
        self.payload.kind()
    }

    /// Encode into exactly one frame: header + body.
    ///
    /// A body over `MAX_FRAME` is refused here, before any bytes hit
    /// the wire; the receiver enforces the same cap on its side.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        wire::put_str(&mut body, &self.sender);
        wire::put_str(&mut body, &self.target);
        match &self.payload {
            Payload::Ack | Payload::Kill | Payload::Complete => {}
            Payload::Put { key_name, blob } => {
                wire::put_str(&mut body, key_name);
                wire::put_blob(&mut body, blob);
            }
            Payload::Get { key_name } | Payload::WaitGet { key_name } => {
                wire::put_str(&mut body, key_name);
            }
            Payload::Value { blob } => {
                wire::put_blob(&mut body, blob);
            }
            Payload::Register { node_index } => {
                body.put_u32_le(*node_index);
            }
            Payload::Directory { addresses, node_indexes } => {
                body.put_u32_le(addresses.len() as u32);
                for addr in addresses {
                    wire::put_str(&mut body, addr);
                }
                body.put_u32_le(node_indexes.len() as u32);
                for idx in node_indexes {
                    body.put_u32_le(*idx);
                }
            }
        }

        if body.len() > MAX_FRAME {
            return Err(WireError::FrameTooLarge(body.len()));
        }
        let header = FrameHeader::new(self.kind().into(), body.len() as u32);
        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_slice(header.as_bytes());
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Decode a message body for a validated header kind.
    ///
    /// The body must be consumed exactly; leftover bytes mean the buffer
    /// was produced for a different shape and are rejected.
    pub fn decode(kind: u8, body: &[u8]) -> Result<Self, WireError> {
        let kind = MsgKind::try_from(kind)?;
        let mut buf = body;
        let sender = wire::get_str(&mut buf)?;
        let target = wire::get_str(&mut buf)?;

        let payload = match kind {
            MsgKind::Ack => Payload::Ack,
            MsgKind::Kill => Payload::Kill,
            MsgKind::Complete => Payload::Complete,
            MsgKind::Put => Payload::Put {
                key_name: wire::get_str(&mut buf)?,
                blob: wire::get_blob(&mut buf)?,
            },
            MsgKind::Get => Payload::Get {
                key_name: wire::get_str(&mut buf)?,
            },
            MsgKind::WaitGet => Payload::WaitGet {
                key_name: wire::get_str(&mut buf)?,
            },
            MsgKind::Value => Payload::Value {
                blob: wire::get_blob(&mut buf)?,
            },
            MsgKind::Register => Payload::Register {
                node_index: wire::get_u32(&mut buf)?,
            },
            MsgKind::Directory => {
                let addr_count = wire::get_u32(&mut buf)? as usize;
                let mut addresses = Vec::with_capacity(addr_count.min(1 << 16));
                for _ in 0..addr_count {
                    addresses.push(wire::get_str(&mut buf)?);
                }
                let idx_count = wire::get_u32(&mut buf)? as usize;
                if idx_count != addr_count {
                    return Err(WireError::DirectoryMismatch {
                        addresses: addr_count,
                        indexes: idx_count,
                    });
                }
                let mut node_indexes = Vec::with_capacity(idx_count);
                for _ in 0..idx_count {
                    node_indexes.push(wire::get_u32(&mut buf)?);
                }
                Payload::Directory { addresses, node_indexes }
            }
        };

        if !buf.is_empty() {
            return Err(WireError::TrailingBytes(buf.len()));
        }
        Ok(Self { sender, target, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    fn round_trip(msg: Message) {
        let frame = msg.encode().unwrap();
        let header = FrameHeader::read_from(&frame[..HEADER_LEN]).unwrap();
        header.validate().unwrap();
        assert_eq!(header.length.get() as usize, frame.len() - HEADER_LEN);

        let decoded = Message::decode(header.kind, &frame[HEADER_LEN..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn ack_round_trip() {
        round_trip(Message::new("a:1", "b:2", Payload::Ack));
    }

    #[test]
    fn put_round_trip() {
        round_trip(Message::new(
            "127.0.0.1:9001",
            "127.0.0.1:9002",
            Payload::Put {
                key_name: "words-c0-ck3".into(),
                blob: Bytes::from_static(&[1, 2, 3]),
            },
        ));
    }

    #[test]
    fn get_and_wait_get_round_trip() {
        round_trip(Message::new(
            "a",
            "b",
            Payload::Get { key_name: "k".into() },
        ));
        round_trip(Message::new(
            "a",
            "b",
            Payload::WaitGet { key_name: "k".into() },
        ));
    }

    #[test]
    fn value_with_empty_blob_round_trip() {
        round_trip(Message::new(
            "a",
            "b",
            Payload::Value { blob: Bytes::new() },
        ));
    }

    #[test]
    fn register_round_trip() {
        round_trip(Message::new(
            "127.0.0.1:9001",
            "127.0.0.1:8000",
            Payload::Register { node_index: 2 },
        ));
    }

    #[test]
    fn directory_round_trip() {
        round_trip(Message::new(
            "127.0.0.1:8000",
            "127.0.0.1:9001",
            Payload::Directory {
                addresses: vec!["127.0.0.1:9001".into(), "127.0.0.1:9002".into()],
                node_indexes: vec![0, 1],
            },
        ));
    }

    #[test]
    fn empty_directory_round_trip() {
        round_trip(Message::new(
            "s",
            "p",
            Payload::Directory { addresses: vec![], node_indexes: vec![] },
        ));
    }

    #[test]
    fn kill_and_complete_round_trip() {
        round_trip(Message::new("s", "p", Payload::Kill));
        round_trip(Message::new("p", "s", Payload::Complete));
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        let err = Message::decode(0x7f, &[]).unwrap_err();
        assert_eq!(err, WireError::UnknownKind(0x7f));
    }

    #[test]
    fn mismatched_directory_lists_are_rejected() {
        let msg = Message::new(
            "s",
            "p",
            Payload::Directory {
                addresses: vec!["x".into(), "y".into()],
                node_indexes: vec![0, 1],
            },
        );
        let frame = msg.encode().unwrap();
        // Corrupt the index count (it sits after both address strings).
        let mut raw = frame.to_vec();
        let idx_count_at = raw.len() - 4 - 4 - 4; // two u32 indexes + the count
        raw[idx_count_at] = 3;
        let err = Message::decode(MsgKind::Directory.into(), &raw[HEADER_LEN..]).unwrap_err();
        assert!(matches!(
            err,
            WireError::DirectoryMismatch { .. } | WireError::Truncated { .. }
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let msg = Message::new("a", "b", Payload::Ack);
        let frame = msg.encode().unwrap();
        let mut body = frame[HEADER_LEN..].to_vec();
        body.push(0xaa);
        let err = Message::decode(MsgKind::Ack.into(), &body).unwrap_err();
        assert_eq!(err, WireError::TrailingBytes(1));
    }

    #[test]
    fn decoding_a_put_body_as_register_errors() {
        let msg = Message::new(
            "a",
            "b",
            Payload::Put {
                key_name: "k".into(),
                blob: Bytes::from_static(b"abcdef"),
            },
        );
        let frame = msg.encode().unwrap();
        assert!(Message::decode(MsgKind::Register.into(), &frame[HEADER_LEN..]).is_err());
    }

    #[test]
    fn oversized_body_is_refused_at_encode() {
        let msg = Message::new(
            "a",
            "b",
            Payload::Value {
                blob: Bytes::from(vec![0u8; MAX_FRAME + 1]),
            },
        );
        let err = msg.encode().unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(n) if n > MAX_FRAME));
    }
}
