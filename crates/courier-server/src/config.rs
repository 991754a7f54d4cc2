//! Server configuration.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use courier_proto::LetterHeader;

use crate::errors::ServerError;

/// Server behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerFlags(u32);

impl ServerFlags {
    /// Do not start the HTTP admin/metrics endpoint.
    pub const DISABLE_HTTP_SERVER: Self = Self(1);

    /// All flags in `self` are also set in `other`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ServerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerArgs {
    /// Bind address; empty means wildcard.
    pub ip: String,
    /// TCP listen port for RPC traffic. Zero picks an ephemeral port.
    pub rpc_port: u16,
    /// Admin/metrics HTTP port.
    pub http_port: u16,
    /// Behavior flags.
    pub flags: ServerFlags,
    /// Floor for a request's estimated memory footprint.
    pub basic_request_size: u64,
    /// Multiplier covering allocator fragmentation and framing costs.
    pub bloat_multiplier: f64,
    /// Inflight-byte budget granted to each connection.
    pub memory_avail_per_core: u32,
    /// Payload-read timeout.
    pub recv_timeout: Duration,
    /// Ceiling on request payload size.
    pub max_payload: u32,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            ip: String::new(),
            rpc_port: 7575,
            http_port: 33140,
            flags: ServerFlags::default(),
            basic_request_size: courier_core::DEFAULT_BASIC_REQUEST_SIZE,
            bloat_multiplier: courier_core::DEFAULT_BLOAT_MULTIPLIER,
            memory_avail_per_core: courier_core::DEFAULT_MEMORY_AVAIL,
            recv_timeout: courier_core::DEFAULT_RECV_TIMEOUT,
            max_payload: LetterHeader::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServerArgs {
    fn bind_ip(&self) -> Result<IpAddr, ServerError> {
        if self.ip.is_empty() {
            return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        self.ip
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address `{}`: {e}", self.ip)))
    }

    /// RPC listener bind address.
    pub fn rpc_bind_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.rpc_port))
    }

    /// Admin endpoint bind address.
    pub fn http_bind_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.http_port))
    }
}
