//! Codecs: converting the generic value tree to bytes and back.
//!
//! The RPC layer never looks at bytes directly. It builds an
//! [`rmpv::Value`] array, hands it to a [`Codec`], and ships whatever comes
//! out. Swapping MessagePack for JSON is a config change, not a code change.
//!
//! Besides one-shot `encode`/`decode`, a codec must be able to decode a
//! *prefix* of a buffer. Stream transports rely on this to find frame
//! boundaries: MessagePack and JSON are both self-delimiting, so no length
//! header is needed on the wire.

use std::io::{self, Cursor};

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Encodes value trees to bytes and decodes bytes to value trees.
///
/// The trait is object safe (no generic methods), so transports can hold a
/// `&dyn Codec` without caring which format is in use.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented
    /// in this format.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes the first complete value at the start of `data`.
    ///
    /// Returns the value and the number of bytes it occupied, or `None` if
    /// `data` holds only the beginning of a value and more bytes are needed.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes can never form a valid
    /// value, no matter what follows.
    fn decode_prefix(
        &self,
        data: &[u8],
    ) -> Result<Option<(Value, usize)>, ProtocolError>;

    /// Cheaply checks whether `data` may already hold a complete value.
    ///
    /// `scan` carries progress between calls on a growing buffer, so a
    /// codec that can walk its own framing only looks at each new byte once.
    /// Returning `false` means "definitely incomplete"; `true` means
    /// [`decode_prefix`](Self::decode_prefix) is worth calling. The default
    /// cannot tell and always says `true`.
    fn scan_frame(&self, data: &[u8], scan: &mut FrameScan) -> bool {
        let _ = (data, scan);
        true
    }

    /// Decodes `data` as exactly one value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed,
    /// truncated, or followed by trailing bytes.
    fn decode(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        match self.decode_prefix(data)? {
            Some((value, used)) if used == data.len() => Ok(value),
            Some((_, used)) => Err(ProtocolError::Decode(format!(
                "{} trailing bytes after frame",
                data.len() - used
            ))),
            None => Err(ProtocolError::Decode(format!(
                "incomplete frame ({} bytes)",
                data.len()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MsgpackCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that speaks MessagePack (via `rmpv`). The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn decode_prefix(
        &self,
        data: &[u8],
    ) -> Result<Option<(Value, usize)>, ProtocolError> {
        let mut cursor = Cursor::new(data);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => Ok(Some((value, cursor.position() as usize))),
            Err(err) if is_incomplete(&err) => Ok(None),
            Err(err) => Err(ProtocolError::Decode(err.to_string())),
        }
    }

    fn scan_frame(&self, data: &[u8], scan: &mut FrameScan) -> bool {
        scan_msgpack(data, scan)
    }
}

/// Progress through the frame at the front of a stream buffer.
///
/// Reset it (to `Default`) whenever the frame it was tracking has been
/// consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameScan {
    offset: usize,
    pending: u64,
    started: bool,
}

impl FrameScan {
    /// Bytes of the current frame already walked over.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// What a MessagePack marker says about the bytes that follow it.
enum Head {
    /// A whole value of this many bytes, payload included.
    Value(usize),
    /// A container header of `header` bytes followed by `items` values.
    Items { header: usize, items: u64 },
    /// A marker MessagePack never uses.
    Invalid,
}

/// Reads the big-endian length stored after the marker byte.
fn be_len(data: &[u8], width: usize) -> Option<u64> {
    let bytes = data.get(1..1 + width)?;
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Sizes the value starting at `data[0]`, or `None` if even its header is
/// not fully buffered yet.
fn msgpack_head(data: &[u8]) -> Option<Head> {
    let marker = *data.first()?;
    let sized = |width: usize, extra: usize| {
        be_len(data, width)
            .map(|len| Head::Value((len as usize).saturating_add(1 + width + extra)))
    };
    let head = match marker {
        0x00..=0x7f | 0xc0 | 0xc2 | 0xc3 | 0xe0..=0xff => Head::Value(1),
        0x80..=0x8f => Head::Items {
            header: 1,
            items: 2 * u64::from(marker & 0x0f),
        },
        0x90..=0x9f => Head::Items {
            header: 1,
            items: u64::from(marker & 0x0f),
        },
        0xa0..=0xbf => Head::Value(1 + usize::from(marker & 0x1f)),
        0xc1 => Head::Invalid,
        0xc4 | 0xd9 => return sized(1, 0),
        0xc5 | 0xda => return sized(2, 0),
        0xc6 | 0xdb => return sized(4, 0),
        0xc7 => return sized(1, 1),
        0xc8 => return sized(2, 1),
        0xc9 => return sized(4, 1),
        0xca => Head::Value(5),
        0xcb => Head::Value(9),
        0xcc | 0xd0 => Head::Value(2),
        0xcd | 0xd1 => Head::Value(3),
        0xce | 0xd2 => Head::Value(5),
        0xcf | 0xd3 => Head::Value(9),
        0xd4 => Head::Value(3),
        0xd5 => Head::Value(4),
        0xd6 => Head::Value(6),
        0xd7 => Head::Value(10),
        0xd8 => Head::Value(18),
        0xdc => Head::Items { header: 3, items: be_len(data, 2)? },
        0xdd => Head::Items { header: 5, items: be_len(data, 4)? },
        0xde => Head::Items { header: 3, items: 2 * be_len(data, 2)? },
        0xdf => Head::Items { header: 5, items: 2 * be_len(data, 4)? },
    };
    Some(head)
}

/// Walks MessagePack headers from where `scan` stopped, skipping payloads.
fn scan_msgpack(data: &[u8], scan: &mut FrameScan) -> bool {
    if !scan.started {
        *scan = FrameScan {
            offset: 0,
            pending: 1,
            started: true,
        };
    }
    while scan.pending > 0 {
        let rest = data.get(scan.offset..).unwrap_or_default();
        let Some(head) = msgpack_head(rest) else {
            return false;
        };
        match head {
            // Let the real decoder report it.
            Head::Invalid => return true,
            Head::Value(len) => {
                if rest.len() < len {
                    return false;
                }
                scan.offset += len;
                scan.pending -= 1;
            }
            Head::Items { header, items } => {
                scan.offset += header;
                scan.pending = (scan.pending - 1).saturating_add(items);
            }
        }
    }
    true
}

/// A read that ran off the end of the buffer means "wait for more bytes".
fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e)
        | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Handy for debugging a peer with `nc`. Binary blobs become arrays of
/// numbers and do not round-trip as binary.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode_prefix(
        &self,
        data: &[u8],
    ) -> Result<Option<(Value, usize)>, ProtocolError> {
        let mut stream =
            serde_json::Deserializer::from_slice(data).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => Ok(Some((value, stream.byte_offset()))),
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => Err(ProtocolError::Decode(err.to_string())),
            None => Ok(None),
        }
    }

    // Trailing whitespace is legal JSON, so don't count it as trailing bytes.
    fn decode(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// CodecKind
// ---------------------------------------------------------------------------

/// Selects a codec by name, so the choice can live in a config file.
///
/// `CodecKind` is itself a [`Codec`] that forwards to the selected
/// implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Msgpack,
    #[cfg(feature = "json")]
    Json,
}

impl Codec for CodecKind {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Msgpack => MsgpackCodec.encode(value),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.encode(value),
        }
    }

    fn decode_prefix(
        &self,
        data: &[u8],
    ) -> Result<Option<(Value, usize)>, ProtocolError> {
        match self {
            Self::Msgpack => MsgpackCodec.decode_prefix(data),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.decode_prefix(data),
        }
    }

    fn scan_frame(&self, data: &[u8], scan: &mut FrameScan) -> bool {
        match self {
            Self::Msgpack => MsgpackCodec.scan_frame(data, scan),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.scan_frame(data, scan),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        match self {
            Self::Msgpack => MsgpackCodec.decode(data),
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.decode(data),
        }
    }
}
