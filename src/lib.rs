//! Client side of the SMF RPC protocol.
//!
//! SMF is a binary, length-prefixed, checksummed request/reply transport
//! that multiplexes many in-flight calls over a single full-duplex stream.
//! A background reader task decodes replies and dispatches each one to the
//! caller whose session ID it carries, so calls started concurrently may
//! complete in any order.
//!
//! # Quick Start
//!
//! ```no_run
//! use smf_client::{create_connection, FilterChain};
//!
//! # async fn run() -> smf_client::Result<()> {
//! let connection = create_connection(
//!     "127.0.0.1:9092",
//!     FilterChain::new(),
//!     FilterChain::new(),
//!     None,
//! )
//! .await?;
//!
//! let (reply, meta) = connection.call(b"hello".to_vec(), 42).await?;
//! assert_eq!(reply, b"hello");
//! assert_eq!(meta, 42);
//!
//! connection.close();
//! connection.wait_closed().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Compression
//!
//! Install the built-in ZSTD filters to compress outgoing payloads above a
//! size threshold and transparently decompress incoming ones:
//!
//! ```no_run
//! use smf_client::{ConnectionBuilder, FilterChain};
//! use smf_client::filter::{ZstdCompressionFilter, ZstdDecompressionFilter};
//!
//! # async fn run() -> smf_client::Result<()> {
//! let connection = ConnectionBuilder::new("127.0.0.1:9092")
//!     .outgoing_filters(FilterChain::new().push(ZstdCompressionFilter::new(1024)))
//!     .incoming_filters(FilterChain::new().push(ZstdDecompressionFilter::new()))
//!     .connect()
//!     .await?;
//! # let _ = connection;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

mod connection;
mod error;
pub mod filter;
pub mod protocol;
mod session;
mod util;

pub use connection::{create_connection, Connection, ConnectionBuilder};
pub use error::{ClientError, ConnectionFault, Result};
pub use filter::{CallContext, Filter, FilterChain};
pub use protocol::{Compression, Header};
