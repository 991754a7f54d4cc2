//! Courier server binary.
//!
//! Hosts a demo echo service so the transport can be exercised end to end:
//!
//! ```bash
//! courier-server --rpc-port 7575 --http-port 33140
//! curl http://127.0.0.1:33140/metrics
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::BytesMut;
use clap::Parser;
use courier_core::RecvContext;
use courier_proto::Envelope;
use courier_server::{
    Handler, HandlerError, MethodHandle, Server, ServerArgs, ServerFlags, Service,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Courier RPC server
#[derive(Parser, Debug)]
#[command(name = "courier-server")]
#[command(about = "Courier RPC transport server")]
#[command(version)]
struct Args {
    /// TCP port for RPC traffic
    #[arg(long, default_value = "7575")]
    rpc_port: u16,

    /// HTTP port for the admin/metrics endpoint
    #[arg(long, default_value = "33140")]
    http_port: u16,

    /// Bind address; empty means wildcard
    #[arg(long, default_value = "")]
    ip: String,

    /// Disable the HTTP admin endpoint
    #[arg(long)]
    disable_http_server: bool,

    /// Inflight-byte budget per connection
    #[arg(long, default_value = "16777216")]
    memory_avail_per_core: u32,

    /// Payload read timeout in milliseconds
    #[arg(long, default_value = "10000")]
    recv_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, ctx: RecvContext) -> Result<Envelope, HandlerError> {
        Ok(Envelope::reply(BytesMut::from(&ctx.payload[..])))
    }
}

struct EchoService;

impl Service for EchoService {
    fn service_name(&self) -> &'static str {
        "EchoService"
    }

    fn methods(&self) -> Vec<MethodHandle> {
        vec![MethodHandle::new("EchoService", "Echo", Arc::new(EchoHandler))]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut flags = ServerFlags::default();
    if args.disable_http_server {
        flags = flags | ServerFlags::DISABLE_HTTP_SERVER;
    }

    let mut server = Server::new(ServerArgs {
        ip: args.ip,
        rpc_port: args.rpc_port,
        http_port: args.http_port,
        flags,
        memory_avail_per_core: args.memory_avail_per_core,
        recv_timeout: Duration::from_millis(args.recv_timeout_ms),
        ..Default::default()
    });
    server.register_service(&EchoService)?;

    server.start().await?;
    if let Some(addr) = server.local_addr() {
        tracing::info!(%addr, "serving RPC");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    server.stop().await;

    Ok(())
}
