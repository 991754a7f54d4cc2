//! The server engine.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::Ordering,
    },
    time::Instant,
};

use courier_core::{
    CodecRegistry, Connection, Filter, FilterChain, FrameReader, Gate, Histogram, Limits,
    RecvContext, apply_filters,
};
use courier_proto::Envelope;
use tokio::{
    net::{TcpListener, TcpSocket},
    task::JoinHandle,
};

use crate::{
    admin,
    config::{ServerArgs, ServerFlags},
    errors::ServerError,
    router::Router,
    stats::ServerStats,
};

/// Everything the accept loop and per-connection tasks share.
///
/// Built once at `start`; the routes table and filter chains are read-only
/// from here on.
struct Engine {
    args: ServerArgs,
    router: Router,
    in_filters: FilterChain<RecvContext>,
    out_filters: FilterChain<Envelope>,
    codecs: Arc<CodecRegistry>,
    stats: Arc<ServerStats>,
    hist: Arc<Histogram>,
    reply_gate: Gate,
    open_connections: Mutex<HashMap<u64, Arc<Connection>>>,
}

impl Engine {
    fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.open_connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handles for the running state, consumed by `stop`.
struct Running {
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    accept_task: JoinHandle<()>,
    admin_task: Option<JoinHandle<()>>,
    engine: Arc<Engine>,
}

/// RPC server: accept loop, routes table, filter chains, gated shutdown.
pub struct Server {
    args: ServerArgs,
    router: Router,
    in_filters: FilterChain<RecvContext>,
    out_filters: FilterChain<Envelope>,
    codecs: Arc<CodecRegistry>,
    stats: Arc<ServerStats>,
    hist: Arc<Histogram>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Create a stopped server.
    #[must_use]
    pub fn new(args: ServerArgs) -> Self {
        Self {
            args,
            router: Router::new(),
            in_filters: Vec::new(),
            out_filters: Vec::new(),
            codecs: Arc::new(CodecRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            hist: Arc::new(Histogram::new()),
            running: Mutex::new(None),
        }
    }

    /// Extend the routes table with a service's methods.
    ///
    /// The table must be finalized before [`Server::start`].
    ///
    /// # Errors
    ///
    /// - [`ServerError::DuplicateRoute`] on a request-id collision; fatal.
    pub fn register_service(&mut self, service: &dyn crate::router::Service) -> Result<(), ServerError> {
        self.router.register_service(service)
    }

    /// Append an ingress filter. Chains are immutable after `start`.
    pub fn register_incoming_filter(&mut self, filter: Arc<dyn Filter<RecvContext>>) {
        self.in_filters.push(filter);
    }

    /// Append an egress filter. Chains are immutable after `start`.
    pub fn register_outgoing_filter(&mut self, filter: Arc<dyn Filter<Envelope>>) {
        self.out_filters.push(filter);
    }

    /// Replace the codec registry consulted on the request path.
    pub fn set_codecs(&mut self, codecs: Arc<CodecRegistry>) {
        self.codecs = codecs;
    }

    /// Aggregated server counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Dispatch latency histogram.
    #[must_use]
    pub fn histogram(&self) -> &Arc<Histogram> {
        &self.hist
    }

    /// Address the RPC listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    /// Address the admin endpoint is bound to, if enabled and started.
    #[must_use]
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().and_then(|r| r.admin_addr)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the listener and start accepting connections.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyStarted`] on a second call
    /// - [`ServerError::Config`] for an invalid bind address
    /// - [`ServerError::Io`] if binding fails
    pub async fn start(&self) -> Result<(), ServerError> {
        let bind_addr = self.args.rpc_bind_addr()?;
        let admin_addr = self.args.http_bind_addr()?;

        let mut running = self.lock_running();
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = bind_reuseaddr(bind_addr)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, routes = self.router.len(), "starting RPC server");

        let engine = Arc::new(Engine {
            args: self.args.clone(),
            router: self.router.clone(),
            in_filters: self.in_filters.clone(),
            out_filters: self.out_filters.clone(),
            codecs: Arc::clone(&self.codecs),
            stats: Arc::clone(&self.stats),
            hist: Arc::clone(&self.hist),
            reply_gate: Gate::new(),
            open_connections: Mutex::new(HashMap::new()),
        });

        let (admin_task, bound_admin_addr) =
            if self.args.flags.contains(ServerFlags::DISABLE_HTTP_SERVER) {
                (None, None)
            } else {
                let admin_listener = bind_reuseaddr(admin_addr)?;
                let bound = admin_listener.local_addr()?;
                tracing::info!(addr = %bound, "starting HTTP admin endpoint");
                let task =
                    tokio::spawn(admin::serve(admin_listener, Arc::clone(&self.stats)));
                (Some(task), Some(bound))
            };

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&engine), listener));

        *running = Some(Running {
            local_addr,
            admin_addr: bound_admin_addr,
            accept_task,
            admin_task,
            engine,
        });
        Ok(())
    }

    /// Graceful shutdown.
    ///
    /// Aborts the accept listener, shuts down every open connection's read
    /// side so the reader loops exit naturally, then waits on the reply gate
    /// until every in-flight handler has finished and emitted its reply (or
    /// errored). Finally stops the admin endpoint. A no-op if not running.
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        tracing::warn!("stopping RPC server: aborting future accept calls");

        running.accept_task.abort();

        let connections: Vec<Arc<Connection>> =
            running.engine.lock_connections().values().cloned().collect();
        for conn in connections {
            conn.shutdown_recv();
        }

        running.engine.reply_gate.close().await;

        if let Some(admin) = running.admin_task {
            admin.abort();
        }
        tracing::info!("RPC server stopped");
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("rpc_port", &self.args.rpc_port)
            .field("routes", &self.router.len())
            .field("running", &self.lock_running().is_some())
            .finish()
    }
}

/// Bind a listener with `SO_REUSEADDR`.
fn bind_reuseaddr(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

/// Accept until aborted; one handler task per connection.
async fn accept_loop(engine: Arc<Engine>, listener: TcpListener) {
    let mut connection_idx: u64 = 0;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            },
        };

        connection_idx += 1;
        engine.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        engine.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let limits = Arc::new(Limits::new(
            engine.args.basic_request_size,
            engine.args.bloat_multiplier,
            engine.args.memory_avail_per_core,
            engine.args.recv_timeout,
        ));
        match Connection::new(stream, limits, engine.args.max_payload) {
            Ok((conn, reader)) => {
                tracing::debug!(remote = %addr, id = connection_idx, "connection accepted");
                engine.lock_connections().insert(connection_idx, Arc::clone(&conn));
                // Do not await: connections are served in parallel.
                tokio::spawn(handle_client_connection(
                    Arc::clone(&engine),
                    connection_idx,
                    conn,
                    reader,
                ));
            },
            Err(e) => {
                tracing::warn!(remote = %addr, error = %e, "could not set up connection");
                engine.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            },
        }
    }
}

/// Per-connection reader: parse frames, hand each off to a dispatch task.
async fn handle_client_connection(
    engine: Arc<Engine>,
    connection_id: u64,
    conn: Arc<Connection>,
    mut reader: FrameReader,
) {
    while conn.is_valid() {
        let Some(header) = reader.read_header().await else {
            break;
        };

        if header.size() > engine.args.max_payload {
            engine.stats.too_large_requests.fetch_add(1, Ordering::Relaxed);
            conn.set_error("oversize");
            break;
        }

        // read_payload reserves header.size bytes before pulling the payload
        // off the socket; the reservation rides inside the context until the
        // dispatch task drops it.
        let Some(ctx) = reader.read_payload(header, &engine.codecs).await else {
            break;
        };

        // Dispatch on a background task: the reader never blocks on handler
        // completion, so requests on one connection pipeline.
        tokio::spawn(dispatch_rpc(Arc::clone(&engine), Arc::clone(&conn), ctx));
    }

    if let Some(error) = conn.error() {
        tracing::error!(remote = %conn.remote_addr(), error, "connection error");
        engine.stats.bad_requests.fetch_add(1, Ordering::Relaxed);
        conn.close_send().await;
    }
    // No error: leave the write half open. In-flight dispatch tasks still
    // hold the connection and may be mid-reply; the socket closes when the
    // last reference drops.
    engine.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    engine.lock_connections().remove(&connection_id);
    tracing::debug!(remote = %conn.remote_addr(), id = connection_id, "connection closed");
}

/// Route and run one request, then frame the reply.
async fn dispatch_rpc(engine: Arc<Engine>, conn: Arc<Connection>, ctx: RecvContext) {
    if ctx.request_id() == 0 {
        conn.set_error("missing request id");
        conn.disable();
        return;
    }
    let Some(method) = engine.router.get(ctx.request_id()) else {
        engine.stats.no_route_requests.fetch_add(1, Ordering::Relaxed);
        conn.set_error(format!("no route for request {:#010x}", ctx.request_id()));
        conn.disable();
        return;
    };

    engine
        .stats
        .in_bytes
        .fetch_add(courier_proto::LetterHeader::SIZE as u64 + ctx.payload.len() as u64, Ordering::Relaxed);

    // The gate is the ordering primitive for graceful shutdown: once closed,
    // no new work; until drained, stop() does not resolve. The guard is held
    // through reply accounting below.
    let Ok(_gate_guard) = engine.reply_gate.enter() else {
        tracing::info!("cannot dispatch rpc, server is shutting down");
        conn.disable();
        return;
    };

    let start = Instant::now();
    let oneway = ctx.header.is_oneway();
    let session = ctx.session();

    // The request follows [filters] -> handler -> [filters]. A failure at any
    // stage invalidates the whole connection, not just the request.
    let result: Result<(), String> = async {
        let ctx = apply_filters(&engine.in_filters, ctx).await.map_err(|e| e.to_string())?;
        let reply = method.handler.handle(ctx).await.map_err(|e| e.to_string())?;
        let mut reply = apply_filters(&engine.out_filters, reply).await.map_err(|e| e.to_string())?;

        if oneway {
            tracing::debug!(session, "oneway request: reply suppressed");
            return Ok(());
        }

        reply.letter.header.set_session(session);
        engine.stats.out_bytes.fetch_add(reply.letter.wire_size() as u64, Ordering::Relaxed);
        conn.send(&mut reply).await.map_err(|e| e.to_string())
    }
    .await;

    match result {
        Ok(()) => {
            engine.hist.record(start.elapsed());
            engine.stats.completed_requests.fetch_add(1, Ordering::Relaxed);
        },
        Err(error) => {
            tracing::error!(remote = %conn.remote_addr(), error, "dispatch failed");
            conn.set_error(error);
            conn.disable();
            conn.close_send().await;
        },
    }
}
