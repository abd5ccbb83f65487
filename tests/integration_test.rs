//! End-to-end tests against a small hand-rolled SMF peer on loopback TCP.
//!
//! `Connection` speaks to a real `tokio::net::TcpStream`, so these tests spin
//! up a `TcpListener` on an ephemeral port and drive the server side by hand,
//! reading and writing raw frames with the same header codec the client
//! uses.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use smf_client::filter::{ZstdCompressionFilter, ZstdDecompressionFilter};
use smf_client::protocol::{header, Compression, HEADER_SIZE};
use smf_client::{create_connection, ClientError, ConnectionFault, FilterChain};

async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Surface the reader task's `tracing` output when a test runs with
/// `RUST_LOG` set; a no-op if a subscriber is already installed.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smf_client=debug")))
        .with_test_writer()
        .try_init();
}

/// Read one raw frame off `stream`: a 16-byte header followed by its payload.
async fn read_raw_frame(stream: &mut TcpStream) -> (Compression, u16, u32, Vec<u8>) {
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).await.unwrap();
    let decoded = header::decode(&header_bytes).unwrap();
    let mut payload = vec![0u8; decoded.size as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (decoded.compression, decoded.session, decoded.meta, payload)
}

/// Write one raw frame to `stream`.
async fn write_raw_frame(stream: &mut TcpStream, compression: Compression, session: u16, meta: u32, payload: &[u8]) {
    let bytes = header::encode(compression, session, payload, meta);
    stream.write_all(&bytes).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
}

#[tokio::test]
async fn basic_call_round_trips_payload_and_meta() {
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (_compression, session, meta, payload) = read_raw_frame(&mut stream).await;
        write_raw_frame(&mut stream, Compression::None, session, meta, &payload).await;
    });

    let connection = create_connection(&addr, FilterChain::new(), FilterChain::new(), None)
        .await
        .unwrap();

    let (reply, meta) = connection.call(b"hello".to_vec(), 42).await.unwrap();
    assert_eq!(reply, b"hello");
    assert_eq!(meta, 42);

    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_complete_out_of_order() {
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Read all three requests first, then reply in a different order
        // than they arrived, proving dispatch is keyed by session, not FIFO.
        let first = read_raw_frame(&mut stream).await;
        let second = read_raw_frame(&mut stream).await;
        let third = read_raw_frame(&mut stream).await;

        for (_, session, meta, payload) in [third, first, second] {
            write_raw_frame(&mut stream, Compression::None, session, meta, &payload).await;
        }
    });

    let connection = create_connection(&addr, FilterChain::new(), FilterChain::new(), None)
        .await
        .unwrap();

    let a = connection.call(b"A".to_vec(), 1);
    let b = connection.call(b"B".to_vec(), 2);
    let c = connection.call(b"C".to_vec(), 3);

    let (ra, rb, rc) = tokio::join!(a, b, c);
    assert_eq!(ra.unwrap(), (b"A".to_vec(), 1));
    assert_eq!(rb.unwrap(), (b"B".to_vec(), 2));
    assert_eq!(rc.unwrap(), (b"C".to_vec(), 3));

    server.await.unwrap();
}

#[tokio::test]
async fn compressible_payload_is_compressed_on_the_wire_and_decompressed_on_reply() {
    let (listener, addr) = local_listener().await;
    let payload = vec![b'x'; 1024];

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (compression, session, meta, body) = read_raw_frame(&mut stream).await;
        assert_eq!(compression, Compression::Zstd, "payload above threshold should arrive compressed");

        use std::io::Read;
        let mut decoder = zstd::stream::read::Decoder::new(body.as_slice()).unwrap();
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, vec![b'x'; 1024]);

        let reply_body = zstd::stream::encode_all(decompressed.as_slice(), 0).unwrap();
        write_raw_frame(&mut stream, Compression::Zstd, session, meta, &reply_body).await;
    });

    let connection = create_connection(
        &addr,
        FilterChain::new().push(ZstdDecompressionFilter::new()),
        FilterChain::new().push(ZstdCompressionFilter::new(16)),
        None,
    )
    .await
    .unwrap();

    let (reply, meta) = connection.call(payload.clone(), 7).await.unwrap();
    assert_eq!(reply, payload);
    assert_eq!(meta, 7);

    server.await.unwrap();
}

#[tokio::test]
async fn corrupted_reply_checksum_fails_the_call_and_the_connection() {
    init_tracing();
    let (listener, addr) = local_listener().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (_compression, session, meta, payload) = read_raw_frame(&mut stream).await;

        // Build a header whose checksum matches the original payload, then
        // flip a byte in the body actually written, so the client's
        // recomputed checksum cannot match.
        let header_bytes = header::encode(Compression::None, session, &payload, meta);
        let mut corrupted = payload.clone();
        corrupted[0] ^= 0xFF;

        stream.write_all(&header_bytes).await.unwrap();
        stream.write_all(&corrupted).await.unwrap();
        stream.flush().await.unwrap();

        // Keep the socket open long enough for the client to observe the
        // failure before the server task exits and drops it.
        let mut scratch = [0u8; 1];
        let _ = stream.read(&mut scratch).await;
    });

    let connection = create_connection(&addr, FilterChain::new(), FilterChain::new(), None)
        .await
        .unwrap();

    let result = connection.call(b"payload".to_vec(), 1).await;
    assert!(matches!(
        result,
        Err(ClientError::Connection(ConnectionFault::ChecksumMismatch))
    ));

    // The reader has torn down the connection; a subsequent call observes it
    // closed rather than hanging.
    let second = connection.call(b"again".to_vec(), 1).await;
    assert!(matches!(second, Err(ClientError::Closed)));

    drop(server);
}

#[tokio::test]
async fn closing_drains_in_flight_calls_with_connection_closed() {
    let (listener, addr) = local_listener().await;

    // A server that accepts the connection and reads frames but never
    // replies, so every call stays pending until the client closes.
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = [0u8; 256];
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    });

    let connection = create_connection(&addr, FilterChain::new(), FilterChain::new(), None)
        .await
        .unwrap();

    // Spawn so both calls actually start (allocate a session and write their
    // frame) instead of sitting as unpolled futures until close() runs.
    let conn_a = connection.clone();
    let conn_b = connection.clone();
    let a = tokio::spawn(async move { conn_a.call(b"A".to_vec(), 1).await });
    let b = tokio::spawn(async move { conn_b.call(b"B".to_vec(), 2).await });

    // Give both calls a chance to reach the registry before closing.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    connection.close();
    connection.wait_closed().await;

    let ra = a.await.unwrap();
    let rb = b.await.unwrap();
    assert!(matches!(ra, Err(ClientError::Connection(ConnectionFault::ConnectionClosed))));
    assert!(matches!(rb, Err(ClientError::Connection(ConnectionFault::ConnectionClosed))));

    drop(server);
}

#[tokio::test]
async fn exhausting_every_session_id_reports_no_slot() {
    let (listener, addr) = local_listener().await;

    // A server that accepts the connection and silently discards everything
    // it reads, so no call ever completes and every session stays pending.
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = [0u8; 4096];
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    });

    let connection = create_connection(&addr, FilterChain::new(), FilterChain::new(), None)
        .await
        .unwrap();

    // 65535 is the entire usable ID space (0 is reserved). Keep every one of
    // these calls in flight so the 65536th allocation has nowhere to land.
    let mut in_flight = Vec::with_capacity(65535);
    for i in 0..65535u32 {
        let conn = connection.clone();
        in_flight.push(tokio::spawn(async move {
            let _ = conn.call(vec![0u8; 1], i).await;
        }));
    }

    // Let every spawned call reach `rx.await` (i.e. finish allocating its
    // session and writing its frame) before asking for one more.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let result = connection.call(b"one too many".to_vec(), 1).await;
    assert!(matches!(result, Err(ClientError::NoSlot)));

    connection.close();
    for handle in in_flight {
        handle.abort();
    }
    drop(server);
}
