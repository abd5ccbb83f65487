//! The call context and the filter pipeline applied to it.
//!
//! A filter is an ordered transformation over a [`CallContext`], run
//! left-to-right on either the outbound or inbound path. The built-in ZSTD
//! compression/decompression filters live here; callers may install
//! additional filters of their own in either chain.

use std::fmt;

use crate::protocol::Compression;

/// Maximum decompressed size a single inbound filter will produce.
///
/// Bounds memory growth from a malicious or corrupted peer sending a small
/// compressed frame that expands enormously (a decompression bomb).
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// A mutable record carried through the filter pipeline on both directions.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub payload: Vec<u8>,
    pub meta: u32,
    pub session_id: u16,
    pub compression: Compression,
}

impl CallContext {
    pub fn new(payload: Vec<u8>, meta: u32, session_id: u16) -> Self {
        Self {
            payload,
            meta,
            session_id,
            compression: Compression::None,
        }
    }
}

/// Error raised by a filter while transforming a [`CallContext`].
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("zstd compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("zstd decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("decompressed payload exceeds the maximum allowed size of {limit} bytes")]
    DecompressedTooLarge { limit: usize },
}

/// A single step in a filter chain.
///
/// Implemented for any closure of the right shape, mirroring how the
/// reference implementation treats filters as plain callables rather than
/// an inheritance hierarchy.
pub trait Filter: Send + Sync {
    fn apply(&self, ctx: &mut CallContext) -> Result<(), FilterError>;
}

impl<F> Filter for F
where
    F: Fn(&mut CallContext) -> Result<(), FilterError> + Send + Sync,
{
    fn apply(&self, ctx: &mut CallContext) -> Result<(), FilterError> {
        self(ctx)
    }
}

/// An ordered, immutable chain of filters, applied left-to-right.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn push(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn apply(&self, ctx: &mut CallContext) -> Result<(), FilterError> {
        for filter in &self.filters {
            filter.apply(ctx)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("len", &self.filters.len())
            .finish()
    }
}

/// Outbound filter: ZSTD-compresses the payload if compression is requested
/// and the payload is at least `min_compression_size` bytes. No-op otherwise.
pub struct ZstdCompressionFilter {
    min_compression_size: usize,
    level: i32,
}

impl ZstdCompressionFilter {
    pub fn new(min_compression_size: usize) -> Self {
        Self {
            min_compression_size,
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(min_compression_size: usize, level: i32) -> Self {
        Self {
            min_compression_size,
            level,
        }
    }
}

impl Filter for ZstdCompressionFilter {
    fn apply(&self, ctx: &mut CallContext) -> Result<(), FilterError> {
        // `Disabled` is an explicit per-call opt-out; `Zstd` means an earlier
        // filter already compressed this payload. `None` is the default and
        // is eligible for automatic, threshold-gated compression.
        if ctx.compression != Compression::None {
            return Ok(());
        }
        if ctx.payload.len() < self.min_compression_size {
            return Ok(());
        }
        let compressed = zstd::stream::encode_all(ctx.payload.as_slice(), self.level)
            .map_err(FilterError::Compress)?;
        tracing::trace!(
            before = ctx.payload.len(),
            after = compressed.len(),
            session = ctx.session_id,
            "applied zstd compression filter"
        );
        ctx.payload = compressed;
        ctx.compression = Compression::Zstd;
        Ok(())
    }
}

/// Inbound filter: ZSTD-decompresses the payload if `compression == zstd`.
/// No-op otherwise.
pub struct ZstdDecompressionFilter {
    max_decompressed_size: usize,
}

impl Default for ZstdDecompressionFilter {
    fn default() -> Self {
        Self {
            max_decompressed_size: MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl ZstdDecompressionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_decompressed_size(max_decompressed_size: usize) -> Self {
        Self { max_decompressed_size }
    }
}

impl Filter for ZstdDecompressionFilter {
    fn apply(&self, ctx: &mut CallContext) -> Result<(), FilterError> {
        if ctx.compression != Compression::Zstd {
            return Ok(());
        }
        use std::io::Read;
        let mut decoder =
            zstd::stream::read::Decoder::new(ctx.payload.as_slice()).map_err(FilterError::Decompress)?;
        let mut out = Vec::new();
        let mut limited = (&mut decoder).take(self.max_decompressed_size as u64 + 1);
        limited.read_to_end(&mut out).map_err(FilterError::Decompress)?;
        if out.len() as u64 > self.max_decompressed_size as u64 {
            return Err(FilterError::DecompressedTooLarge {
                limit: self.max_decompressed_size,
            });
        }
        tracing::trace!(
            before = ctx.payload.len(),
            after = out.len(),
            session = ctx.session_id,
            "applied zstd decompression filter"
        );
        ctx.payload = out;
        ctx.compression = Compression::None;
        Ok(())
    }
}
