//! Wire format: the frame header and its checksum.
//!
//! This module contains the wire format types and codec logic for the SMF
//! frame header. It has no knowledge of sessions, filters, or transport;
//! those live in [`crate::session`], [`crate::filter`], and [`crate::connection`].

pub mod checksum;
pub mod header;

pub use checksum::checksum;
pub use header::{Compression, Header, HeaderError, HEADER_SIZE, MAX_BUFFER_SIZE};
