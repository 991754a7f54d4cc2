//! Per-connection resource limits.
//!
//! The inflight-byte semaphore is the unified admission-control and
//! backpressure mechanism: reads reserve the declared payload size before the
//! payload is pulled off the socket, and writes reserve an estimate of the
//! request's memory footprint before framing begins. Permits are bytes.

use std::{sync::Arc, time::Duration};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::LimitsClosed;

/// Default floor for a request's estimated memory footprint.
pub const DEFAULT_BASIC_REQUEST_SIZE: u64 = 256;

/// Default multiplier covering allocator fragmentation and framing costs.
pub const DEFAULT_BLOAT_MULTIPLIER: f64 = 1.57;

/// Default inflight-byte budget per connection.
pub const DEFAULT_MEMORY_AVAIL: u32 = 16 * 1024 * 1024;

/// Default payload-read timeout.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte-budget admission control for one connection.
#[derive(Debug)]
pub struct Limits {
    inflight: Arc<Semaphore>,
    capacity: u32,
    basic_request_size: u64,
    bloat_multiplier: f64,
    recv_timeout: Duration,
}

impl Limits {
    /// Create limits with an inflight budget of `memory_avail` bytes.
    #[must_use]
    pub fn new(
        basic_request_size: u64,
        bloat_multiplier: f64,
        memory_avail: u32,
        recv_timeout: Duration,
    ) -> Self {
        Self {
            inflight: Arc::new(Semaphore::new(memory_avail as usize)),
            capacity: memory_avail,
            basic_request_size,
            bloat_multiplier,
            recv_timeout,
        }
    }

    /// Payload-read timeout enforced by the frame reader.
    #[must_use]
    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    /// Total byte budget.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inflight.available_permits()
    }

    /// Send-side reservation estimate:
    /// `max(payload_len, basic_request_size) * bloat_multiplier`, clamped to
    /// the budget so an oversized estimate degrades to "reserve everything"
    /// instead of deadlocking.
    #[must_use]
    pub fn estimate_request_size(&self, payload_len: usize) -> u32 {
        let floored = (payload_len as u64).max(self.basic_request_size);
        let bloated = (floored as f64 * self.bloat_multiplier) as u64;
        bloated.min(u64::from(self.capacity)) as u32
    }

    /// Reserve `bytes` from the inflight budget, waiting for headroom.
    ///
    /// The reservation is released when the returned permit drops; callers
    /// hold it across the whole in-flight window (read → dispatch → reply on
    /// the server, frame emission on the client).
    ///
    /// # Errors
    ///
    /// - [`LimitsClosed`] if the budget was torn down while waiting.
    pub async fn reserve(&self, bytes: u32) -> Result<OwnedSemaphorePermit, LimitsClosed> {
        let clamped = bytes.min(self.capacity);
        Arc::clone(&self.inflight)
            .acquire_many_owned(clamped)
            .await
            .map_err(|_| LimitsClosed)
    }

    /// Tear down the budget: pending and future reservations fail.
    pub fn close(&self) {
        self.inflight.close();
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASIC_REQUEST_SIZE,
            DEFAULT_BLOAT_MULTIPLIER,
            DEFAULT_MEMORY_AVAIL,
            DEFAULT_RECV_TIMEOUT,
        )
    }
}
