//! Error taxonomy for the SMF client.
//!
//! Distinguishes framing, protocol, allocation, lifecycle, and transport
//! failures so calling code can match on cause rather than parse a message
//! string. [`ConnectionFault`] is the subset that is terminal to the whole
//! connection and gets broadcast to every pending caller; [`ClientError`] is
//! what a single `call` actually returns, which additionally covers
//! call-local failures ([`ConnectionFault::NoSlot`]-adjacent allocation
//! failures and filter errors).

use std::sync::Arc;

use crate::filter::FilterError;
use crate::protocol::header::HeaderError;
use crate::session::NoSlot;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// A cause that is fatal to the whole connection and is delivered identically
/// to every pending caller.
///
/// Cheaply cloneable: the reader task captures one value and fans it out to
/// every pending reply. `Transport` carries its `std::io::Error` behind an
/// `Arc` rather than deriving `PartialEq`/`Eq` here, since `std::io::Error`
/// implements neither.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionFault {
    /// A framing error: the header or its payload failed wire validation.
    #[error("framing error: {0}")]
    Framing(#[from] HeaderError),

    /// The reader received a reply for a session that has no pending
    /// caller. Fatal: the stream is assumed frame-aligned and this can only
    /// mean desync or a misbehaving peer.
    #[error("reply for unknown session")]
    UnknownSession,

    /// A reply's payload did not match its header checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The connection was closed, either by an explicit `close()` or by the
    /// reader task being cancelled.
    #[error("connection closed")]
    ConnectionClosed,

    /// A transport-level failure (I/O error, EOF, reset).
    ///
    /// Wrapped in an `Arc` rather than stored as `std::io::Error` directly:
    /// this variant must stay `Clone` so the reader task can fan one cause
    /// out to every pending caller, and `Arc` preserves `source()` chaining
    /// to the original error instead of flattening it to a message.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<std::io::Error>),
}

/// Errors returned to a single caller from [`crate::connection::Connection::call`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection (or the call in flight) failed for a reason shared by
    /// every other pending caller.
    #[error(transparent)]
    Connection(#[from] ConnectionFault),

    /// No session slot was available; call-local, does not affect the
    /// connection or other callers.
    #[error("no session slot available")]
    NoSlot,

    /// An outgoing or incoming filter failed while processing this call.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// `call` was invoked while the connection was already closing or closed.
    #[error("connection is closed")]
    Closed,

    /// The address or timeout passed to `create_connection` was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<NoSlot> for ClientError {
    fn from(_: NoSlot) -> Self {
        ClientError::NoSlot
    }
}

impl From<std::io::Error> for ConnectionFault {
    fn from(err: std::io::Error) -> Self {
        ConnectionFault::Transport(Arc::new(err))
    }
}
