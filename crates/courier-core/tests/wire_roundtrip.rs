//! Frame read/write paths over a loopback socket.

use std::{sync::Arc, time::Duration};

use courier_core::{CodecRegistry, Connection, FrameReader, Limits};
use courier_proto::{Envelope, LetterHeader};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};

const MAX_PAYLOAD: u32 = LetterHeader::DEFAULT_MAX_PAYLOAD;

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).await.expect("connect");
    let (server, _) = listener.accept().await.expect("accept");
    (client, server)
}

fn test_limits(recv_timeout: Duration) -> Arc<Limits> {
    Arc::new(Limits::new(64, 1.5, 1024 * 1024, recv_timeout))
}

fn server_side(stream: TcpStream, recv_timeout: Duration) -> (Arc<Connection>, FrameReader) {
    Connection::new(stream, test_limits(recv_timeout), MAX_PAYLOAD).expect("connection")
}

#[tokio::test]
async fn frame_round_trip_over_loopback() {
    let (client, server) = socket_pair().await;
    let (client_conn, _client_reader) =
        Connection::new(client, test_limits(Duration::from_secs(5)), MAX_PAYLOAD)
            .expect("connection");
    let (server_conn, mut reader) = server_side(server, Duration::from_secs(5));

    let mut envelope = Envelope::new(0xABCD, &b"ping"[..]);
    envelope.letter.header.set_session(42);
    client_conn.send(&mut envelope).await.expect("send");

    let header = reader.read_header().await.expect("header parses");
    assert_eq!(header.size(), 4);
    assert_eq!(header.session(), 42);
    assert_eq!(header.meta(), 0xABCD);

    let codecs = CodecRegistry::new();
    let ctx = reader.read_payload(header, &codecs).await.expect("payload parses");
    assert_eq!(&ctx.payload[..], b"ping");
    assert_eq!(ctx.session(), 42);
    assert_eq!(ctx.request_id(), 0xABCD);
    assert!(server_conn.is_valid());

    // The byte reservation is held by the context and released on drop.
    let before = server_conn.limits().available();
    drop(ctx);
    assert_eq!(server_conn.limits().available(), before + 4);
}

#[tokio::test]
async fn checksum_mismatch_latches_invalid_payload() {
    let (mut client, server) = socket_pair().await;
    let (conn, mut reader) = server_side(server, Duration::from_secs(5));

    let mut envelope = Envelope::new(1, &b"ping"[..]);
    let mut wire = Vec::new();
    envelope.letter.encode(&mut wire).expect("encode");
    let last = wire.len() - 1;
    wire[last] ^= 0xFF;
    client.write_all(&wire).await.expect("write corrupt frame");

    let header = reader.read_header().await.expect("header itself is fine");
    let codecs = CodecRegistry::new();
    assert!(reader.read_payload(header, &codecs).await.is_none());
    assert_eq!(conn.error(), Some("Invalid payload"));
    assert!(!conn.is_valid());
}

#[tokio::test]
async fn payload_read_honors_recv_timeout() {
    let (mut client, server) = socket_pair().await;
    let (conn, mut reader) = server_side(server, Duration::from_millis(20));

    // Declare 300 payload bytes, then hold.
    let mut header = LetterHeader::default();
    header.set_size(300);
    header.set_checksum(0xDEAD_BEEF);
    client.write_all(&header.to_bytes()).await.expect("write header");

    let parsed = reader.read_header().await.expect("header parses");
    let codecs = CodecRegistry::new();
    assert!(reader.read_payload(parsed, &codecs).await.is_none());
    assert_eq!(conn.error(), Some("recv_timeout"));
    assert!(!conn.is_valid());
}

#[tokio::test]
async fn peer_close_mid_header_marks_eof() {
    let (mut client, server) = socket_pair().await;
    let (conn, mut reader) = server_side(server, Duration::from_secs(5));

    client.write_all(&[0u8; 7]).await.expect("write partial header");
    client.shutdown().await.expect("close");
    drop(client);

    assert!(reader.read_header().await.is_none());
    assert!(!conn.is_valid());
    assert!(!conn.has_error());
}

#[tokio::test]
async fn zeroed_header_is_rejected() {
    let (mut client, server) = socket_pair().await;
    let (conn, mut reader) = server_side(server, Duration::from_secs(5));

    client.write_all(&[0u8; LetterHeader::SIZE]).await.expect("write header");

    assert!(reader.read_header().await.is_none());
    assert!(conn.error().is_some_and(|e| e.starts_with("Invalid header")));
}

#[tokio::test]
async fn shutdown_recv_wakes_blocked_reader() {
    let (_client, server) = socket_pair().await;
    let (conn, mut reader) = server_side(server, Duration::from_secs(5));

    let read_task = tokio::spawn(async move { reader.read_header().await });
    tokio::task::yield_now().await;

    conn.shutdown_recv();
    let header = tokio::time::timeout(Duration::from_secs(1), read_task)
        .await
        .expect("reader wakes")
        .expect("task");
    assert!(header.is_none());
    assert!(!conn.is_enabled());
}
