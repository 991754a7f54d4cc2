//! Receive half of the wire codec.
//!
//! [`FrameReader`] owns a connection's read half; exactly one reader task
//! drives it, so reads on a connection are strictly sequential. Parse
//! failures do not propagate as errors: they latch the connection and return
//! `None`, and the reader loop exits at its next `is_valid` check.

use std::sync::Arc;

use bytes::Bytes;
use courier_proto::{CompressionKind, LetterHeader, payload_checksum};
use tokio::{
    io::{AsyncReadExt, BufReader},
    net::tcp::OwnedReadHalf,
    sync::OwnedSemaphorePermit,
};

use crate::{compression::CodecRegistry, connection::Connection};

/// A parsed request or response plus its connection context.
///
/// Carries the byte-budget reservation made before the payload was read; the
/// reservation is released when the context drops, so backpressure covers the
/// whole in-flight window.
pub struct RecvContext {
    /// Parsed wire header.
    pub header: LetterHeader,
    /// Payload bytes (uncompressed if the header named a codec).
    pub payload: Bytes,
    conn: Arc<Connection>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RecvContext {
    /// Connection-scoped session id, echoed from the header.
    #[must_use]
    pub fn session(&self) -> u16 {
        self.header.session()
    }

    /// Routing id (`service_id XOR method_id`); zero on replies.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        self.header.meta()
    }

    /// The owning connection (peer identity for filters).
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Peer address of the owning connection.
    #[must_use]
    pub fn remote_addr(&self) -> std::net::SocketAddr {
        self.conn.remote_addr()
    }

    /// Replace the payload (ingress filters use this).
    pub fn replace_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }
}

impl std::fmt::Debug for RecvContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvContext")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .field("remote", &self.conn.remote_addr())
            .finish()
    }
}

/// Reads `[header || payload]` frames off a connection's input stream.
pub struct FrameReader {
    io: BufReader<OwnedReadHalf>,
    conn: Arc<Connection>,
    max_payload: u32,
}

impl FrameReader {
    pub(crate) fn new(
        io: BufReader<OwnedReadHalf>,
        conn: Arc<Connection>,
        max_payload: u32,
    ) -> Self {
        Self { io, conn, max_payload }
    }

    /// The connection this reader feeds.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Configured payload ceiling.
    #[must_use]
    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// Read exactly one header.
    ///
    /// `None` on EOF, short read, shutdown, or a header violating the wire
    /// invariants (`size > 0`, `checksum != 0`, known compression). The
    /// caller is expected to latch and exit; EOF and invariant violations are
    /// latched here. The payload ceiling is *not* enforced here so the caller
    /// can count oversize requests before dropping the connection.
    pub async fn read_header(&mut self) -> Option<LetterHeader> {
        let mut buf = [0u8; LetterHeader::SIZE];

        let read = tokio::select! {
            () = self.conn.recv_closed() => return None,
            read = self.io.read_exact(&mut buf) => read,
        };

        match read {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.conn.mark_eof();
                return None;
            },
            Err(e) => {
                self.conn.set_error(format!("header read failed: {e}"));
                return None;
            },
        }

        let header = match LetterHeader::from_bytes(&buf) {
            Ok(header) => *header,
            Err(e) => {
                self.conn.set_error(format!("Invalid header: {e}"));
                return None;
            },
        };

        // Invariant check minus the ceiling (caller's concern, see above).
        if let Err(e) = header.validate(u32::MAX) {
            self.conn.set_error(format!("Invalid header: {e}"));
            return None;
        }

        Some(header)
    }

    /// Reserve `header.size` bytes from the connection's inflight budget,
    /// then read and verify the payload.
    ///
    /// The read is bounded by the limits' `recv_timeout`. `None` latches the
    /// connection: `"recv_timeout"` on expiry, `"Invalid payload"` on a
    /// checksum mismatch or short read, a codec message when decompression
    /// fails.
    pub async fn read_payload(
        &mut self,
        header: LetterHeader,
        codecs: &CodecRegistry,
    ) -> Option<RecvContext> {
        let limits = Arc::clone(self.conn.limits());
        let permit = tokio::select! {
            () = self.conn.recv_closed() => return None,
            permit = limits.reserve(header.size()) => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.conn.set_error("connection limits closed");
                    return None;
                },
            },
        };

        let size = header.size() as usize;
        let mut buf = vec![0u8; size];
        let read = tokio::select! {
            () = self.conn.recv_closed() => return None,
            read = tokio::time::timeout(limits.recv_timeout(), self.io.read_exact(&mut buf)) => read,
        };

        match read {
            Ok(Ok(_)) => {},
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.conn.mark_eof();
                self.conn.set_error("Invalid payload");
                return None;
            },
            Ok(Err(e)) => {
                self.conn.set_error(format!("payload read failed: {e}"));
                return None;
            },
            Err(_elapsed) => {
                self.conn.set_error("recv_timeout");
                return None;
            },
        }

        self.conn.add_in_bytes(size as u64);

        let actual = payload_checksum(&buf);
        if actual != header.checksum() {
            tracing::warn!(
                remote = %self.conn.remote_addr(),
                expected = header.checksum(),
                actual,
                "payload checksum mismatch"
            );
            self.conn.set_error("Invalid payload");
            return None;
        }

        let payload = match header.compression() {
            CompressionKind::None => Bytes::from(buf),
            kind => {
                let Some(codec) = codecs.get(kind) else {
                    self.conn.set_error(format!("no codec registered for {kind:?}"));
                    return None;
                };
                match codec.uncompress(&buf) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.conn.set_error(format!("uncompress failed: {e}"));
                        return None;
                    },
                }
            },
        };

        Some(RecvContext {
            header,
            payload,
            conn: Arc::clone(&self.conn),
            _permit: Some(permit),
        })
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("remote", &self.conn.remote_addr())
            .field("max_payload", &self.max_payload)
            .finish()
    }
}
