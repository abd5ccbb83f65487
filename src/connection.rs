//! The connection driver: the dominant component.
//!
//! Owns the reader/writer halves of a TCP stream, exposes `call`, and runs a
//! background reader task that decodes replies and dispatches them to the
//! caller that is waiting on them. Closing is cooperative: `close()` signals
//! the reader and returns immediately; `wait_closed()` awaits the reader's
//! exit and drains every still-pending caller with a terminal cause exactly
//! once.

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::error::{ClientError, ConnectionFault, Result};
use crate::filter::{CallContext, FilterChain};
use crate::protocol::header::{self, HEADER_SIZE};
use crate::session::SessionRegistry;
use crate::util::parse_address;

/// Connection lifecycle state (see the state machine in the design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

struct Inner {
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    registry: StdMutex<SessionRegistry>,
    state: StdMutex<State>,
    close_notify: Notify,
    outgoing_filters: FilterChain,
    incoming_filters: FilterChain,
    reader_handle: AsyncMutex<Option<JoinHandle<()>>>,
    peer: SocketAddr,
}

impl Inner {
    /// Drain the registry and mark the connection closed. Idempotent: a
    /// second call with a different cause is a no-op, since only the first
    /// terminal cause is meaningful.
    fn fail(&self, cause: ConnectionFault) {
        let mut state = self.state.lock().unwrap();
        if *state == State::Closed {
            return;
        }
        *state = State::Closed;
        drop(state);
        self.registry.lock().unwrap().fail_all(cause);
    }

    fn is_open(&self) -> bool {
        *self.state.lock().unwrap() == State::Open
    }
}

/// A handle to an established SMF connection.
///
/// Cheaply cloneable: clones share the same underlying reader task, writer,
/// and session registry, which is what lets many callers issue concurrent
/// `call`s over one physical connection.
#[derive(Clone)]
pub struct Connection {
    inner: std::sync::Arc<Inner>,
}

impl Connection {
    /// Issue a request and await its reply.
    ///
    /// Allocates a session, applies the outgoing filter chain, writes the
    /// framed request, then awaits the reader's dispatch of the matching
    /// reply before applying the incoming filter chain.
    pub async fn call(&self, payload: Vec<u8>, func_id: u32) -> Result<(Vec<u8>, u32)> {
        if !self.inner.is_open() {
            return Err(ClientError::Closed);
        }

        let (session_id, rx) = self
            .inner
            .registry
            .lock()
            .unwrap()
            .allocate()
            .map_err(ClientError::from)?;

        let mut guard = SessionGuard {
            inner: &self.inner,
            session_id,
            armed: true,
        };

        let mut ctx = CallContext::new(payload, func_id, session_id);
        if let Err(err) = self.inner.outgoing_filters.apply(&mut ctx) {
            return Err(ClientError::Filter(err));
        }

        if let Err(err) = self.send_frame(&ctx).await {
            return Err(err);
        }

        let reply = rx.await;
        guard.armed = false;
        drop(guard);

        match reply {
            Ok(Ok(mut reply_ctx)) => {
                self.inner
                    .incoming_filters
                    .apply(&mut reply_ctx)
                    .map_err(ClientError::Filter)?;
                Ok((reply_ctx.payload, reply_ctx.meta))
            }
            Ok(Err(fault)) => Err(ClientError::Connection(fault)),
            Err(_) => Err(ClientError::Connection(ConnectionFault::ConnectionClosed)),
        }
    }

    async fn send_frame(&self, ctx: &CallContext) -> Result<()> {
        let header = header::encode(ctx.compression, ctx.session_id, &ctx.payload, ctx.meta);

        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::Closed)?;

        let result = async {
            writer.write_all(&header).await?;
            writer.write_all(&ctx.payload).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(io_err) = result {
            drop(guard);
            let fault: ConnectionFault = io_err.into();
            tracing::warn!(cause = %fault, "send failed, terminating connection");
            self.inner.fail(fault.clone());
            return Err(ClientError::Connection(fault));
        }

        Ok(())
    }

    /// Idempotent, non-blocking. Signals the reader to stop and schedules
    /// the writer to close.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if *state != State::Open {
            return;
        }
        *state = State::Closing;
        drop(state);

        self.inner.close_notify.notify_one();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut guard = inner.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        });
    }

    /// Await reader completion and writer closure, then fail every
    /// still-pending reply with `ConnectionClosed` (a no-op if the reader
    /// already drained the registry with a more specific cause).
    pub async fn wait_closed(&self) {
        let handle = { self.inner.reader_handle.lock().await.take() };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        {
            let mut guard = self.inner.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
        }

        self.inner.fail(ConnectionFault::ConnectionClosed);
    }

    /// The peer address this connection was established with.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }
}

/// Removes an allocated session from the registry if the `call` future is
/// dropped before its reply arrives (the caller was cancelled), so a later
/// reply does not find an orphan session and trip `UnknownSession`.
struct SessionGuard<'a> {
    inner: &'a Inner,
    session_id: u16,
    armed: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.registry.lock().unwrap().remove(self.session_id);
        }
    }
}

/// Read one frame and build its (unfiltered) reply [`CallContext`], or
/// report the terminal cause that should end the reader loop.
async fn read_frame(reader: &mut OwnedReadHalf) -> std::result::Result<CallContext, ConnectionFault> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = header::decode(&header_bytes)?;

    let mut payload = vec![0u8; header.size as usize];
    reader.read_exact(&mut payload).await?;

    let computed = crate::protocol::checksum::checksum(&payload);
    if computed != header.checksum {
        return Err(ConnectionFault::ChecksumMismatch);
    }

    Ok(CallContext {
        payload,
        meta: header.meta,
        session_id: header.session,
        compression: header.compression.normalize(),
    })
}

async fn read_loop(inner: std::sync::Arc<Inner>, mut reader: OwnedReadHalf) {
    loop {
        tokio::select! {
            biased;
            _ = inner.close_notify.notified() => {
                tracing::debug!(peer = %inner.peer, "reader stopping on close()");
                inner.fail(ConnectionFault::ConnectionClosed);
                return;
            }
            outcome = read_frame(&mut reader) => {
                match outcome {
                    Ok(ctx) => {
                        let session_id = ctx.session_id;
                        let resolved = inner.registry.lock().unwrap().resolve(session_id, ctx);
                        if !resolved {
                            tracing::error!(session = session_id, "reply for unknown session, terminating reader");
                            inner.fail(ConnectionFault::UnknownSession);
                            return;
                        }
                        tracing::debug!(session = session_id, "dispatched reply");
                    }
                    Err(fault) => {
                        tracing::warn!(cause = %fault, peer = %inner.peer, "reader terminating");
                        inner.fail(fault);
                        return;
                    }
                }
            }
        }
    }
}

/// Establish an SMF connection.
///
/// `address` must be of the form `"host:port"`. On successful TCP connect,
/// `TCP_NODELAY` and `SO_KEEPALIVE` are both enabled. `timeout`, if given,
/// must be strictly positive.
pub async fn create_connection(
    address: &str,
    incoming_filters: FilterChain,
    outgoing_filters: FilterChain,
    timeout: Option<Duration>,
) -> Result<Connection> {
    if let Some(timeout) = timeout {
        if timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "connect timeout must be strictly positive".into(),
            ));
        }
    }

    let (host, port) = parse_address(address)?;
    let target = format!("{host}:{port}");

    let connect = TcpStream::connect(&target);
    let stream = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                ClientError::Connection(ConnectionFault::Transport(std::sync::Arc::new(
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                )))
            })?
            .map_err(|e| ClientError::Connection(ConnectionFault::from(e)))?,
        None => connect.await.map_err(|e| ClientError::Connection(ConnectionFault::from(e)))?,
    };

    stream
        .set_nodelay(true)
        .map_err(|e| ClientError::Connection(ConnectionFault::from(e)))?;
    set_keepalive(&stream)?;

    let peer = stream
        .peer_addr()
        .map_err(|e| ClientError::Connection(ConnectionFault::from(e)))?;

    let (read_half, write_half) = stream.into_split();

    let inner = std::sync::Arc::new(Inner {
        writer: AsyncMutex::new(Some(write_half)),
        registry: StdMutex::new(SessionRegistry::new()),
        state: StdMutex::new(State::Open),
        close_notify: Notify::new(),
        outgoing_filters,
        incoming_filters,
        reader_handle: AsyncMutex::new(None),
        peer,
    });

    let reader_inner = inner.clone();
    let handle = tokio::spawn(read_loop(reader_inner, read_half));
    *inner.reader_handle.lock().await = Some(handle);

    tracing::debug!(peer = %peer, "smf connection established");

    Ok(Connection { inner })
}

/// `tokio::net::TcpStream` does not expose `SO_KEEPALIVE`; reach for the raw
/// socket via `socket2` the way most tokio users tune low-level options.
fn set_keepalive(stream: &TcpStream) -> Result<()> {
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref
        .set_keepalive(true)
        .map_err(|e| ClientError::Connection(ConnectionFault::from(e)))
}

/// A fluent builder for [`create_connection`].
pub struct ConnectionBuilder {
    address: String,
    incoming_filters: FilterChain,
    outgoing_filters: FilterChain,
    timeout: Option<Duration>,
}

impl ConnectionBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            incoming_filters: FilterChain::new(),
            outgoing_filters: FilterChain::new(),
            timeout: None,
        }
    }

    pub fn incoming_filters(mut self, filters: FilterChain) -> Self {
        self.incoming_filters = filters;
        self
    }

    pub fn outgoing_filters(mut self, filters: FilterChain) -> Self {
        self.outgoing_filters = filters;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn connect(self) -> Result<Connection> {
        create_connection(&self.address, self.incoming_filters, self.outgoing_filters, self.timeout).await
    }
}
