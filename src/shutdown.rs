//! Lifecycle coordination for the coalescer.
//!
//! Stops admission, tracks in-flight work (batch dispatches and direct
//! calls) and waits for it to drain before the coalescer stops.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    /// The drain timed out with `remaining` units of work still in flight.
    Timeout { remaining: u32 },
}

/// Coordinates admission, the scheduler loop and in-flight work during
/// shutdown.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track new work admitted by a caller. Returns `None` once shutdown has
    /// begun.
    pub fn track(&self) -> Option<InFlightGuard> {
        let state = self.state.read();
        if *state != ShutdownState::Running {
            return None;
        }
        Some(self.guard())
    }

    /// Track a dispatch cut from already admitted work.
    ///
    /// Unlike [`track`](Self::track) this succeeds while draining: the calls
    /// it carries were accepted before shutdown and still need an outcome.
    pub fn track_dispatch(&self) -> InFlightGuard {
        self.guard()
    }

    fn guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            counter: Arc::clone(&self.in_flight),
            notify: Arc::clone(&self.notify),
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Move to `Draining` and cancel the token.
    ///
    /// Returns `false` if shutdown had already begun.
    pub fn begin(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state != ShutdownState::Running {
                return false;
            }
            *state = ShutdownState::Draining;
        }
        self.token.cancel();
        true
    }

    pub fn finish(&self) {
        *self.state.write() = ShutdownState::Stopped;
    }

    /// Wait until no work is in flight, or `timeout` elapses.
    pub async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return match self.in_flight_count() {
                        0 => ShutdownResult::Complete,
                        remaining => ShutdownResult::Timeout { remaining },
                    };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one unit of in-flight work.
pub struct InFlightGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
