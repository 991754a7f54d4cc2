//! Server counters and their Prometheus text rendering.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic server counters, aggregated for export.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Currently active connections.
    pub active_connections: AtomicU64,
    /// Total connections accepted.
    pub total_connections: AtomicU64,
    /// Payload bytes received on healthy connections.
    pub in_bytes: AtomicU64,
    /// Frame bytes sent to clients.
    pub out_bytes: AtomicU64,
    /// Connections dropped with a latched error.
    pub bad_requests: AtomicU64,
    /// Well-formed requests with no registered handler.
    pub no_route_requests: AtomicU64,
    /// Correct round-trip responses.
    pub completed_requests: AtomicU64,
    /// Requests larger than the configured payload ceiling.
    pub too_large_requests: AtomicU64,
}

impl ServerStats {
    /// Render every counter in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        use std::fmt::Write as _;

        let counters: [(&str, &str, u64); 8] = [
            (
                "active_connections",
                "Currently active connections",
                self.active_connections.load(Ordering::Relaxed),
            ),
            (
                "total_connections",
                "Total connections accepted",
                self.total_connections.load(Ordering::Relaxed),
            ),
            (
                "incoming_bytes",
                "Total bytes received on healthy connections",
                self.in_bytes.load(Ordering::Relaxed),
            ),
            (
                "outgoing_bytes",
                "Total bytes sent to clients",
                self.out_bytes.load(Ordering::Relaxed),
            ),
            ("bad_requests", "Bad requests", self.bad_requests.load(Ordering::Relaxed)),
            (
                "no_route_requests",
                "Requests with a correct header but no handler",
                self.no_route_requests.load(Ordering::Relaxed),
            ),
            (
                "completed_requests",
                "Correct round-trip returned responses",
                self.completed_requests.load(Ordering::Relaxed),
            ),
            (
                "too_large_requests",
                "Requests larger than the configured maximum",
                self.too_large_requests.load(Ordering::Relaxed),
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP courier_{name} {help}");
            let _ = writeln!(out, "# TYPE courier_{name} counter");
            let _ = writeln!(out, "courier_{name} {value}");
        }
        out
    }
}
