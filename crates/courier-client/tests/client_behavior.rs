//! Client boundary behavior against minimal hand-rolled peers.

use std::time::Duration;

use courier_client::{Client, ClientError, ClientOptions};
use courier_proto::Envelope;
use tokio::{io::AsyncWriteExt, net::TcpListener};

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    (listener, addr)
}

#[tokio::test]
async fn send_before_connect_fails_fast() {
    let client = Client::new(ClientOptions::new("127.0.0.1:1"));
    let result = client.send(Envelope::new(1, &b"ping"[..])).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (listener, addr) = listener().await;
    let _accept = tokio::spawn(async move {
        let _ = listener.accept().await;
        std::future::pending::<()>().await;
    });

    let client = Client::new(ClientOptions::new(addr.clone()));
    client.connect().await.expect("first connect succeeds");

    let result = client.connect().await;
    assert!(matches!(result, Err(ClientError::AlreadyConnected(a)) if a == addr));
}

#[tokio::test]
async fn invalid_address_is_a_config_error() {
    let client = Client::new(ClientOptions::new("not-an-address"));
    let result = client.connect().await;
    assert!(matches!(result, Err(ClientError::InvalidAddress { .. })));
}

#[tokio::test]
async fn stop_abandons_pending_requests() {
    let (listener, addr) = listener().await;
    // Peer accepts and stays silent forever.
    let _peer = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        std::future::pending::<()>().await;
    });

    let client = std::sync::Arc::new(Client::new(ClientOptions::new(addr)));
    client.connect().await.expect("connect");

    let pending = {
        let client = std::sync::Arc::clone(&client);
        tokio::spawn(async move { client.send(Envelope::new(7, &b"ping"[..])).await })
    };
    // Let the send register its slot and write the frame.
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.stop().await;

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("future resolves after stop")
        .expect("task");
    assert!(matches!(result, Err(ClientError::ConnectionClosed(_))));
}

#[tokio::test]
async fn garbage_from_peer_latches_error_state() {
    let (listener, addr) = listener().await;
    let _peer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        // A zeroed header violates the size/checksum invariants.
        socket.write_all(&[0u8; 16]).await.expect("write garbage");
        socket.flush().await.expect("flush");
        std::future::pending::<()>().await;
    });

    let client = Client::new(ClientOptions::new(addr));
    client.connect().await.expect("connect");

    // Wait for the reader loop to parse the garbage and latch.
    for _ in 0..100 {
        if client.is_error_state() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.is_error_state());

    let result = client.send(Envelope::new(1, &b"ping"[..])).await;
    assert!(matches!(result, Err(ClientError::ErrorState(_))));
}

#[tokio::test]
async fn oneway_send_resolves_immediately() {
    let (listener, addr) = listener().await;
    let _peer = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        std::future::pending::<()>().await;
    });

    let client = Client::new(ClientOptions::new(addr));
    client.connect().await.expect("connect");

    // The peer never replies, yet a oneway send completes at once.
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        client.send(Envelope::new(9, &b"fire and forget"[..]).oneway()),
    )
    .await
    .expect("resolves without a response")
    .expect("send succeeds");
    assert!(result.is_none());
}
