//! Reply gate: a counted barrier for graceful shutdown.
//!
//! Every dispatched handler enters the gate and holds a guard until its reply
//! is written (or errors). [`Gate::close`] stops admitting new work and
//! resolves once the last guard drops, guaranteeing no handler is interrupted
//! mid-reply.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

use crate::errors::GateClosed;

#[derive(Debug)]
struct State {
    active: usize,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    drained: Notify,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counted barrier admitting work until closed.
#[derive(Debug, Clone)]
pub struct Gate {
    inner: Arc<Inner>,
}

impl Gate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { active: 0, closed: false }),
                drained: Notify::new(),
            }),
        }
    }

    /// Admit one unit of work.
    ///
    /// # Errors
    ///
    /// - [`GateClosed`] once [`Gate::close`] has begun.
    pub fn enter(&self) -> Result<GateGuard, GateClosed> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(GateClosed);
        }
        state.active += 1;
        Ok(GateGuard { inner: Arc::clone(&self.inner) })
    }

    /// Stop admitting work and wait until every admitted unit has finished.
    pub async fn close(&self) {
        self.inner.lock().closed = true;
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            // Register in the waiter list before the count check, or a guard
            // dropping between check and await is never observed.
            drained.as_mut().enable();
            if self.inner.lock().active == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Units of work currently inside the gate.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// The gate has begun (or finished) closing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of admission; dropping it releases the gate slot.
#[derive(Debug)]
pub struct GateGuard {
    inner: Arc<Inner>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut state = self.inner.lock();
            state.active -= 1;
            state.active
        };
        if remaining == 0 {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn close_with_no_work_resolves_immediately() {
        let gate = Gate::new();
        gate.close().await;
        assert!(gate.is_closed());
        assert_eq!(gate.active(), 0);
    }

    #[tokio::test]
    async fn enter_after_close_is_rejected() {
        let gate = Gate::new();
        gate.close().await;
        assert_eq!(gate.enter().err(), Some(GateClosed));
    }

    #[tokio::test]
    async fn close_waits_for_admitted_work() {
        let gate = Gate::new();
        let guard = gate.enter().expect("gate is open");

        let closer = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.close().await })
        };
        tokio::task::yield_now().await;
        assert!(!closer.is_finished());

        // New work is already rejected while the guard is still live.
        assert_eq!(gate.enter().err(), Some(GateClosed));

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), closer)
            .await
            .expect("close resolves after last guard drops")
            .expect("task");
        assert_eq!(gate.active(), 0);
    }

    #[tokio::test]
    async fn counter_tracks_concurrent_guards() {
        let gate = Gate::new();
        let a = gate.enter().expect("open");
        let b = gate.enter().expect("open");
        assert_eq!(gate.active(), 2);
        drop(a);
        assert_eq!(gate.active(), 1);
        drop(b);
        assert_eq!(gate.active(), 0);
    }
}
