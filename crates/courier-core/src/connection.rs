//! A single RPC connection.
//!
//! Owns a socket's split halves plus the per-connection error latch, enabled
//! flag, byte counters, and limits. The write half sits behind a
//! `tokio::sync::Mutex`: at most one outbound frame is being emitted at any
//! time, so bytes never interleave on the wire. The read half is handed to a
//! [`FrameReader`](crate::wire::FrameReader), owned exclusively by the
//! connection's single reader task.

use std::{
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use courier_proto::Envelope;
use tokio::{
    io::{AsyncWriteExt, BufReader, BufWriter},
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, Notify},
};

use crate::{limits::Limits, wire::FrameReader};

/// Per-connection byte counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Payload bytes received on healthy frames.
    pub in_bytes: AtomicU64,
    /// Frame bytes written to the socket.
    pub out_bytes: AtomicU64,
}

/// One endpoint of an RPC connection.
#[derive(Debug)]
pub struct Connection {
    remote_addr: SocketAddr,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    limits: Arc<Limits>,
    error: OnceLock<String>,
    enabled: AtomicBool,
    eof: AtomicBool,
    shutdown: Notify,
    stats: ConnectionStats,
}

impl Connection {
    /// Split `stream` into a connection handle and its frame reader.
    ///
    /// # Errors
    ///
    /// I/O error if the peer address cannot be read off the socket.
    pub fn new(
        stream: TcpStream,
        limits: Arc<Limits>,
        max_payload: u32,
    ) -> std::io::Result<(Arc<Self>, FrameReader)> {
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Self {
            remote_addr,
            writer: Mutex::new(BufWriter::new(write_half)),
            limits,
            error: OnceLock::new(),
            enabled: AtomicBool::new(true),
            eof: AtomicBool::new(false),
            shutdown: Notify::new(),
            stats: ConnectionStats::default(),
        });
        let reader = FrameReader::new(BufReader::new(read_half), Arc::clone(&conn), max_payload);
        Ok((conn, reader))
    }

    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// This connection's byte budget.
    #[must_use]
    pub fn limits(&self) -> &Arc<Limits> {
        &self.limits
    }

    /// Byte counters.
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Not at EOF, no latched error, and still enabled.
    ///
    /// The reader loop consults this between every frame.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.eof.load(Ordering::Acquire)
            && !self.has_error()
            && self.enabled.load(Ordering::Acquire)
    }

    /// Still enabled (not disabled by shutdown or a fatal dispatch error).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Latch an error; the first call wins.
    pub fn set_error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        if self.error.set(msg.clone()).is_ok() {
            tracing::debug!(remote = %self.remote_addr, error = %msg, "connection error latched");
        }
    }

    /// An error has been latched.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.get().is_some()
    }

    /// The latched error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    /// Disable the connection; the reader loop exits at the next check.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Shut down the receive side: disable, wake a reader blocked mid-read,
    /// and fail any reservation still waiting on the byte budget.
    pub fn shutdown_recv(&self) {
        self.disable();
        self.limits.close();
    }

    /// Resolves once [`Connection::shutdown_recv`] (or `disable`) was called.
    pub async fn recv_closed(&self) {
        loop {
            if !self.enabled.load(Ordering::Acquire) {
                return;
            }
            let notified = self.shutdown.notified();
            tokio::pin!(notified);
            // Register in the waiter list before the re-check, or a disable
            // racing between check and await is never observed.
            notified.as_mut().enable();
            if !self.enabled.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// The peer closed its send side.
    pub(crate) fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    /// Record received payload bytes.
    pub(crate) fn add_in_bytes(&self, n: u64) {
        self.stats.in_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Frame `envelope` onto the socket and flush.
    ///
    /// Seals the letter (checksum + size), then writes `[header || payload]`
    /// under the single-writer lock.
    ///
    /// # Errors
    ///
    /// I/O errors from the socket; an empty payload maps to
    /// `InvalidInput`. Callers latch the connection on failure.
    pub async fn send(&self, envelope: &mut Envelope) -> std::io::Result<()> {
        let mut wire = Vec::with_capacity(envelope.letter.wire_size());
        envelope
            .letter
            .encode(&mut wire)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&wire).await?;
        writer.flush().await?;
        drop(writer);

        self.stats.out_bytes.fetch_add(wire.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Close the write half, flushing buffered bytes best-effort.
    pub async fn close_send(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(remote = %self.remote_addr, error = %e, "error closing write half");
        }
    }
}
