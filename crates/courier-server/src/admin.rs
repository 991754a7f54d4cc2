//! Minimal HTTP admin endpoint serving `GET /metrics`.
//!
//! One endpoint, text responses, connection-per-request; not a general HTTP
//! server. Disabled entirely by
//! [`ServerFlags::DISABLE_HTTP_SERVER`](crate::ServerFlags::DISABLE_HTTP_SERVER).

use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::stats::ServerStats;

/// Accept admin connections until the task is aborted.
pub(crate) async fn serve(listener: TcpListener, stats: Arc<ServerStats>) {
    loop {
        match listener.accept().await {
            Ok((socket, _addr)) => {
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    if let Err(e) = respond(socket, &stats).await {
                        tracing::debug!(error = %e, "admin request failed");
                    }
                });
            },
            Err(e) => {
                tracing::warn!(error = %e, "admin accept failed");
                return;
            },
        }
    }
}

async fn respond(mut socket: TcpStream, stats: &ServerStats) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let n = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let (status, body) = match request.lines().next().map(str::trim) {
        Some(line) if line.starts_with("GET /metrics ") => {
            ("200 OK", stats.render_prometheus())
        },
        _ => ("404 Not Found", String::from("not found\n")),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
