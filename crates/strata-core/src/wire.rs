//! strata wire format — the on-wire framing and body codec.
//!
//! These types ARE the protocol. Every message travels as one frame:
//! an 8-byte fixed header followed by `length` body bytes. Changing
//! anything here is a breaking change for every node in a cluster.
//!
//! The header is #[repr(C, packed)] with zerocopy derives for a
//! deterministic layout and allocation-free parsing. Body fields are
//! explicitly little-endian and written through `bytes::BufMut`, read
//! back through `bytes::Buf` with bounds checks on every field —
//! a truncated or mistyped buffer is a typed error, never UB.

use bytes::{Buf, BufMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame header ─────────────────────────────────────────────────────────────

/// Fixed header preceding every frame on the wire.
///
/// The receiver can size its body read from `length` before touching a
/// single body byte. `kind` selects the message variant; dispatch on it
/// happens in `message::Message::decode`.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Body length in bytes, not including this header.
    pub length: U32<LittleEndian>,

    /// Message kind tag. Unknown values are a protocol error.
    pub kind: u8,

    /// Wire format version. Currently 0x01.
    /// A receiver seeing any other version rejects the frame.
    pub version: u8,

    /// Reserved, must be zero.
    pub reserved: [u8; 2],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 8]);

impl FrameHeader {
    pub fn new(kind: u8, length: u32) -> Self {
        Self {
            length: U32::new(length),
            kind,
            version: WIRE_VERSION,
            reserved: [0; 2],
        }
    }

    /// Validate version, reserved bytes, and the frame size cap.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(self.version));
        }
        if self.reserved != [0; 2] {
            return Err(WireError::ReservedBytesSet);
        }
        let len = self.length.get() as usize;
        if len > MAX_FRAME {
            return Err(WireError::FrameTooLarge(len));
        }
        Ok(())
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Maximum frame body size in bytes.
/// Bounds allocation on decode; a column chunk blob fits comfortably.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer truncated: needed {needed} more bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("unknown message kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved header bytes are non-zero")]
    ReservedBytesSet,

    #[error("frame body length {0} exceeds maximum {max}", max = MAX_FRAME)]
    FrameTooLarge(usize),

    #[error("invalid boolean byte: 0x{0:02x}")]
    BadBool(u8),

    #[error("string field is not valid UTF-8")]
    BadUtf8,

    #[error("directory field lengths differ: {addresses} addresses, {indexes} indexes")]
    DirectoryMismatch { addresses: usize, indexes: usize },

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

// ── Body primitives ──────────────────────────────────────────────────────────

fn need(buf: &impl Buf, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated {
            needed: n - buf.remaining(),
            have: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn get_i64(buf: &mut impl Buf) -> Result<i64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_i64_le())
}

pub fn get_f64(buf: &mut impl Buf) -> Result<f64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_f64_le())
}

pub fn get_bool(buf: &mut impl Buf) -> Result<bool, WireError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WireError::BadBool(other)),
    }
}

/// Write a length-prefixed UTF-8 string.
///
/// There is no separate null marker: the empty string is the "absent"
/// sentinel, matching how key names and addresses default.
pub fn put_str(buf: &mut impl BufMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub fn get_str(buf: &mut impl Buf) -> Result<String, WireError> {
    let len = get_u32(buf)? as usize;
    if len > MAX_FRAME {
        return Err(WireError::FrameTooLarge(len));
    }
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| WireError::BadUtf8)
}

/// Write a length-prefixed opaque byte blob.
pub fn put_blob(buf: &mut impl BufMut, blob: &[u8]) {
    buf.put_u32_le(blob.len() as u32);
    buf.put_slice(blob);
}

pub fn get_blob(buf: &mut impl Buf) -> Result<bytes::Bytes, WireError> {
    let len = get_u32(buf)? as usize;
    if len > MAX_FRAME {
        return Err(WireError::FrameTooLarge(len));
    }
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

// ── Column element codec ─────────────────────────────────────────────────────

/// Element types that can live in a chunked column and be carried in a
/// chunk blob: fixed-width numerics, booleans, and strings.
///
/// Sequences of `WireValue`s are encoded as a u32 element count followed
/// by the elements in order; decoding consumes fields in exactly the
/// order they were written.
pub trait WireValue: Clone + PartialEq + Send + Sync + 'static {
    fn encode_into(&self, buf: &mut impl BufMut);
    fn decode_from(buf: &mut impl Buf) -> Result<Self, WireError>;
}

impl WireValue for i64 {
    fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(*self);
    }
    fn decode_from(buf: &mut impl Buf) -> Result<Self, WireError> {
        get_i64(buf)
    }
}

impl WireValue for f64 {
    fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_f64_le(*self);
    }
    fn decode_from(buf: &mut impl Buf) -> Result<Self, WireError> {
        get_f64(buf)
    }
}

impl WireValue for bool {
    fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(*self as u8);
    }
    fn decode_from(buf: &mut impl Buf) -> Result<Self, WireError> {
        get_bool(buf)
    }
}

impl WireValue for String {
    fn encode_into(&self, buf: &mut impl BufMut) {
        put_str(buf, self);
    }
    fn decode_from(buf: &mut impl Buf) -> Result<Self, WireError> {
        get_str(buf)
    }
}

/// Encode a homogeneous sequence: u32 count + elements in order.
pub fn encode_seq<T: WireValue>(values: &[T]) -> bytes::Bytes {
    let mut buf = bytes::BytesMut::new();
    buf.put_u32_le(values.len() as u32);
    for v in values {
        v.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Decode a homogeneous sequence written by `encode_seq`.
/// Trailing bytes after the last element are a decode error.
pub fn decode_seq<T: WireValue>(blob: &[u8]) -> Result<Vec<T>, WireError> {
    let mut buf = blob;
    let count = get_u32(&mut buf)? as usize;
    if count > MAX_FRAME {
        return Err(WireError::FrameTooLarge(count));
    }
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(T::decode_from(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes(buf.remaining()));
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────
