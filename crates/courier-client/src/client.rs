//! The client engine.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use courier_core::{
    CodecRegistry, Connection, Filter, FilterChain, FrameReader, Histogram, Limits, RecvContext,
    apply_filters,
};
use courier_proto::{Envelope, LetterHeader};
use tokio::{net::TcpStream, sync::oneshot};

use crate::errors::ClientError;

/// Client configuration; mirrors the server's byte-budget knobs.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Floor for a request's estimated memory footprint.
    pub basic_request_size: u64,
    /// Multiplier covering allocator fragmentation and framing costs.
    pub bloat_multiplier: f64,
    /// Inflight-byte budget for this client's connection.
    pub memory_avail_for_client: u32,
    /// Payload-read timeout on the response path.
    pub recv_timeout: Duration,
    /// Ceiling on response payload size.
    pub max_payload: u32,
}

impl ClientOptions {
    /// Options for `server_addr` with default byte-budget knobs.
    #[must_use]
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            basic_request_size: courier_core::DEFAULT_BASIC_REQUEST_SIZE,
            bloat_multiplier: courier_core::DEFAULT_BLOAT_MULTIPLIER,
            memory_avail_for_client: courier_core::DEFAULT_MEMORY_AVAIL,
            recv_timeout: courier_core::DEFAULT_RECV_TIMEOUT,
            max_payload: LetterHeader::DEFAULT_MAX_PAYLOAD,
        }
    }
}

type Slot = oneshot::Sender<Option<RecvContext>>;

/// State shared between the caller-facing API and the reader loop.
struct Shared {
    conn: Arc<Connection>,
    slots: Mutex<HashMap<u16, Slot>>,
    // Monotonic; truncated to u16 on stamping. Wider than the wire field so
    // wraparound allocation can skip ids still in flight.
    session_counter: AtomicU32,
}

impl Shared {
    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Allocate the next free session id and park `slot` under it.
///
/// No two in-flight requests may share a session id; occupied ids are
/// skipped, and once all 65536 are pending the send fails fast.
fn allocate_slot(
    slots: &mut HashMap<u16, Slot>,
    counter: &AtomicU32,
    slot: Slot,
) -> Result<u16, ClientError> {
    if slots.len() > usize::from(u16::MAX) {
        return Err(ClientError::TooManyInflight);
    }
    loop {
        let session = counter.fetch_add(1, Ordering::Relaxed) as u16;
        if let std::collections::hash_map::Entry::Vacant(entry) = slots.entry(session) {
            entry.insert(slot);
            return Ok(session);
        }
    }
}

/// RPC client: one TCP connection, concurrent in-flight requests correlated
/// by session id.
pub struct Client {
    opts: ClientOptions,
    in_filters: FilterChain<RecvContext>,
    out_filters: FilterChain<Envelope>,
    codecs: Arc<CodecRegistry>,
    hist: Option<Arc<Histogram>>,
    shared: OnceLock<Arc<Shared>>,
}

impl Client {
    /// Create an unconnected client.
    #[must_use]
    pub fn new(opts: ClientOptions) -> Self {
        Self {
            opts,
            in_filters: Vec::new(),
            out_filters: Vec::new(),
            codecs: Arc::new(CodecRegistry::new()),
            hist: None,
            shared: OnceLock::new(),
        }
    }

    /// Append an ingress filter. Chains are immutable after `connect`.
    pub fn register_incoming_filter(&mut self, filter: Arc<dyn Filter<RecvContext>>) {
        self.in_filters.push(filter);
    }

    /// Append an egress filter. Chains are immutable after `connect`.
    pub fn register_outgoing_filter(&mut self, filter: Arc<dyn Filter<Envelope>>) {
        self.out_filters.push(filter);
    }

    /// Replace the codec registry consulted on the response path.
    pub fn set_codecs(&mut self, codecs: Arc<CodecRegistry>) {
        self.codecs = codecs;
    }

    /// Start recording send latencies.
    pub fn enable_histogram_metrics(&mut self) {
        if self.hist.is_none() {
            self.hist = Some(Arc::new(Histogram::new()));
        }
    }

    /// Borrowed latency histogram, if enabled.
    #[must_use]
    pub fn histogram(&self) -> Option<&Arc<Histogram>> {
        self.hist.as_ref()
    }

    /// A connection has been established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.get().is_some()
    }

    /// The connection has a latched error.
    #[must_use]
    pub fn is_error_state(&self) -> bool {
        self.shared.get().is_some_and(|s| s.conn.has_error())
    }

    /// Open the TCP connection and start the reader loop.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyConnected`] on a second call
    /// - [`ClientError::InvalidAddress`] if the configured address is bogus
    /// - [`ClientError::Io`] if the connect itself fails
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.shared.get().is_some() {
            return Err(ClientError::AlreadyConnected(self.opts.server_addr.clone()));
        }

        let addr: SocketAddr =
            self.opts.server_addr.parse().map_err(|e: std::net::AddrParseError| {
                ClientError::InvalidAddress {
                    addr: self.opts.server_addr.clone(),
                    reason: e.to_string(),
                }
            })?;

        let stream = TcpStream::connect(addr).await?;
        let limits = Arc::new(Limits::new(
            self.opts.basic_request_size,
            self.opts.bloat_multiplier,
            self.opts.memory_avail_for_client,
            self.opts.recv_timeout,
        ));
        let (conn, reader) = Connection::new(stream, limits, self.opts.max_payload)?;

        let shared = Arc::new(Shared {
            conn,
            slots: Mutex::new(HashMap::new()),
            session_counter: AtomicU32::new(0),
        });
        if self.shared.set(Arc::clone(&shared)).is_err() {
            // Lost a connect race; the winner's reader loop is in charge.
            return Err(ClientError::AlreadyConnected(self.opts.server_addr.clone()));
        }

        tracing::debug!(server = %addr, "client connected");
        tokio::spawn(reader_loop(shared, reader, Arc::clone(&self.codecs)));
        Ok(())
    }

    /// Issue a request.
    ///
    /// Stamps a fresh session id, runs the egress filters, dispatches the
    /// write concurrently, and resolves with the correlated response after
    /// the ingress filters. A oneway envelope resolves immediately with
    /// `None` and never waits.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] before `connect`
    /// - [`ClientError::ErrorState`] once the connection latched an error
    /// - [`ClientError::TooManyInflight`] with 65536 requests pending
    /// - [`ClientError::Filter`] if a chain stage rejects
    /// - [`ClientError::ConnectionClosed`] if the connection dies first
    pub async fn send(&self, mut envelope: Envelope) -> Result<Option<RecvContext>, ClientError> {
        let shared = self.shared.get().ok_or(ClientError::NotConnected)?;
        if let Some(error) = shared.conn.error() {
            return Err(ClientError::ErrorState(error.to_string()));
        }
        if !shared.conn.is_enabled() {
            return Err(ClientError::ConnectionClosed("connection stopped".to_string()));
        }

        let measure = self.hist.as_ref().map(|h| (Arc::clone(h), Instant::now()));
        let oneway = envelope.letter.header.is_oneway();

        let rx = if oneway {
            let session = shared.session_counter.fetch_add(1, Ordering::Relaxed) as u16;
            envelope.letter.header.set_session(session);
            None
        } else {
            let (tx, rx) = oneshot::channel();
            let session =
                allocate_slot(&mut shared.lock_slots(), &shared.session_counter, tx)?;
            envelope.letter.header.set_session(session);
            Some((session, rx))
        };

        let envelope = match apply_filters(&self.out_filters, envelope).await {
            Ok(envelope) => envelope,
            Err(e) => {
                if let Some((session, _)) = &rx {
                    shared.lock_slots().remove(session);
                }
                return Err(e.into());
            },
        };

        // Dispatch the write concurrently; the response resolves via the
        // reader loop, not the write path.
        let write_shared = Arc::clone(shared);
        let failed_session = rx.as_ref().map(|(session, _)| *session);
        tokio::spawn(async move {
            if let Err(e) = dispatch_write(&write_shared, envelope).await {
                tracing::error!(error = %e, "error sending data");
                write_shared.conn.set_error(format!("send failed: {e}"));
                if let Some(session) = failed_session {
                    write_shared.lock_slots().remove(&session);
                }
            }
        });

        let Some((_, rx)) = rx else {
            if let Some((hist, start)) = measure {
                hist.record(start.elapsed());
            }
            return Ok(None);
        };

        let response = match rx.await {
            Ok(response) => response,
            Err(_) => {
                let reason = shared
                    .conn
                    .error()
                    .unwrap_or("connection stopped before the response arrived")
                    .to_string();
                return Err(ClientError::ConnectionClosed(reason));
            },
        };

        let response = match response {
            Some(ctx) => Some(apply_filters(&self.in_filters, ctx).await?),
            None => None,
        };

        if let Some((hist, start)) = measure {
            hist.record(start.elapsed());
        }
        Ok(response)
    }

    /// Shut down the receive side.
    ///
    /// The reader loop exits at its next suspension point; in-flight futures
    /// that were not already resolved are abandoned with the connection
    /// error.
    pub async fn stop(&self) {
        if let Some(shared) = self.shared.get() {
            shared.conn.shutdown_recv();
            shared.conn.close_send().await;
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_addr", &self.opts.server_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Frame one envelope under the writer lock and the byte budget.
async fn dispatch_write(shared: &Shared, mut envelope: Envelope) -> std::io::Result<()> {
    let reserve = shared.conn.limits().estimate_request_size(envelope.payload_len());
    let _permit = shared
        .conn
        .limits()
        .reserve(reserve)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))?;
    shared.conn.send(&mut envelope).await
}

/// Correlate inbound frames to pending slots until the connection dies.
async fn reader_loop(shared: Arc<Shared>, mut reader: FrameReader, codecs: Arc<CodecRegistry>) {
    while shared.conn.is_valid() {
        let Some(header) = reader.read_header().await else {
            break;
        };
        if header.size() > reader.max_payload() {
            shared.conn.set_error("oversize");
            break;
        }
        let Some(ctx) = reader.read_payload(header, &codecs).await else {
            break;
        };

        let session = ctx.session();
        let Some(slot) = shared.lock_slots().remove(&session) else {
            // The server must echo our session id; an unknown one is a
            // protocol error.
            shared.conn.set_error(format!("unknown session {session}"));
            break;
        };
        // A dropped receiver means the caller went away; nothing to resolve.
        let _ = slot.send(Some(ctx));
    }

    // Abandon every request still pending; dropping the senders resolves
    // their futures with the connection error.
    let abandoned = {
        let mut slots = shared.lock_slots();
        let n = slots.len();
        slots.clear();
        n
    };
    if abandoned > 0 {
        tracing::error!(
            abandoned,
            error = shared.conn.error().unwrap_or("closed"),
            "failing enqueued reads for client"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_slot() -> Slot {
        oneshot::channel().0
    }

    #[test]
    fn allocation_is_monotonic() {
        let mut slots = HashMap::new();
        let counter = AtomicU32::new(0);

        let a = allocate_slot(&mut slots, &counter, dummy_slot()).expect("free ids");
        let b = allocate_slot(&mut slots, &counter, dummy_slot()).expect("free ids");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn wraparound_skips_inflight_ids() {
        let mut slots = HashMap::new();
        // 0 and 1 are still in flight from the previous epoch.
        slots.insert(0u16, dummy_slot());
        slots.insert(1u16, dummy_slot());
        // Counter has wrapped back around to 0.
        let counter = AtomicU32::new(u32::from(u16::MAX) + 1);

        let session = allocate_slot(&mut slots, &counter, dummy_slot()).expect("free ids");
        assert_eq!(session, 2);
    }

    #[test]
    fn allocation_fails_when_every_id_is_pending() {
        let mut slots = HashMap::new();
        for id in 0..=u16::MAX {
            slots.insert(id, dummy_slot());
        }
        let counter = AtomicU32::new(0);

        let result = allocate_slot(&mut slots, &counter, dummy_slot());
        assert!(matches!(result, Err(ClientError::TooManyInflight)));
    }
}
