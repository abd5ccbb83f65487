//! The 16-byte frame header.
//!
//! Every frame on the wire is `[16-byte header][payload of header.size bytes]`.
//! The header's byte layout is fixed by the SMF wire format: it is the tail of
//! a FlatBuffers-encoded root object with the leading 4-byte root offset
//! stripped away. We reproduce that tail directly rather than linking a
//! FlatBuffers runtime, since the byte order below is the entire contract.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::protocol::checksum::checksum;

/// Maximum payload size accepted on the wire.
pub const MAX_BUFFER_SIZE: u32 = 1 << 31;

/// Size in bytes of the wire header.
pub const HEADER_SIZE: usize = 16;

/// Compression flag carried in the header and in the [`crate::filter::CallContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Payload is not compressed.
    None,
    /// Compression is explicitly disabled for this frame.
    ///
    /// Distinct from `None` on the wire, but normalized to `None` once a
    /// frame is delivered to a caller (see [`Compression::normalize`]).
    Disabled,
    /// Payload is ZSTD-compressed.
    Zstd,
}

impl Compression {
    const NONE: u8 = 0;
    const DISABLED: u8 = 1;
    const ZSTD: u8 = 2;
    const MAX: u8 = Self::ZSTD;

    /// Decode the wire byte, rejecting values above the known maximum.
    pub fn from_wire(byte: u8) -> Result<Self, HeaderError> {
        match byte {
            Self::NONE => Ok(Compression::None),
            Self::DISABLED => Ok(Compression::Disabled),
            Self::ZSTD => Ok(Compression::Zstd),
            _ => Err(HeaderError::InvalidCompression),
        }
    }

    /// Encode to the wire byte.
    pub fn to_wire(self) -> u8 {
        match self {
            Compression::None => Self::NONE,
            Compression::Disabled => Self::DISABLED,
            Compression::Zstd => Self::ZSTD,
        }
    }

    /// `disabled` normalizes to `none` once delivered to a caller; the other
    /// variants pass through unchanged.
    pub fn normalize(self) -> Self {
        match self {
            Compression::Disabled => Compression::None,
            other => other,
        }
    }
}

/// The raw 16-byte wire layout, field order matching the FlatBuffers tail.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
struct RawHeader {
    compression: u8,
    bitflags: u8,
    session: u16,
    size: u32,
    checksum: u32,
    meta: u32,
}

/// A decoded and validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub compression: Compression,
    pub session: u16,
    pub size: u32,
    pub checksum: u32,
    pub meta: u32,
}

/// Failures produced while decoding or validating a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("frame has an empty body (size == 0)")]
    EmptyBody,
    #[error("payload size exceeds the maximum buffer size")]
    OversizePayload,
    #[error("compression flag is out of range")]
    InvalidCompression,
    #[error("checksum field is empty (checksum == 0)")]
    EmptyChecksum,
    #[error("bitflags field is non-zero (not implemented)")]
    UnsupportedBitflags,
    #[error("meta field is empty (meta == 0)")]
    EmptyMeta,
}

/// Encode a header for an outgoing frame.
///
/// `session` and `meta` come from the call context; `compression` and `size`
/// are derived from the context's current payload. The checksum is computed
/// here, over `payload`.
pub fn encode(compression: Compression, session: u16, payload: &[u8], meta: u32) -> [u8; HEADER_SIZE] {
    let raw = RawHeader {
        compression: compression.to_wire(),
        bitflags: 0,
        session,
        size: payload.len() as u32,
        checksum: checksum(payload),
        meta,
    };
    let mut out = [0u8; HEADER_SIZE];
    out.copy_from_slice(raw.as_bytes());
    out
}

/// Decode and validate a header read off the wire.
///
/// Checks run in the order documented on the wire format: empty body, then
/// oversize, then compression range, then empty checksum, then bitflags,
/// then empty meta. The first violated check determines the error.
pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Header, HeaderError> {
    let raw = RawHeader::read_from_bytes(bytes).expect("fixed-size array matches RawHeader layout");

    if raw.size == 0 {
        return Err(HeaderError::EmptyBody);
    }
    if raw.size > MAX_BUFFER_SIZE {
        return Err(HeaderError::OversizePayload);
    }
    let compression = Compression::from_wire(raw.compression)?;
    if raw.checksum == 0 {
        return Err(HeaderError::EmptyChecksum);
    }
    if raw.bitflags != 0 {
        return Err(HeaderError::UnsupportedBitflags);
    }
    if raw.meta == 0 {
        return Err(HeaderError::EmptyMeta);
    }

    Ok(Header {
        compression,
        session: raw.session,
        size: raw.size,
        checksum: raw.checksum,
        meta: raw.meta,
    })
}
