//! Clock abstraction (C1): the single source of wall time for every
//! expiration check, uploaded-at stamp, and gate-related timing decision.
//!
//! No component outside this module is permitted to call `SystemTime::now()`
//! directly — tests substitute a [`ManualClock`] instead of monkey-patching.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of current time, expressed in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since epoch.
    fn now_ms(&self) -> i64;

    /// Current time in whole seconds since epoch (floor).
    fn now_secs(&self) -> i64 {
        self.now_ms().div_euclid(1000)
    }
}

/// Clock backed by the OS wall clock. The default for production use.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Clock with an explicit, advanceable value. Used by tests that need
/// deterministic expiration behavior.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(initial_ms: i64) -> Self {
        Self {
            millis: AtomicI64::new(initial_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.millis.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Convenience constructor for a shared, fixed-at-zero clock.
pub fn manual(initial_ms: i64) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(initial_ms))
}
