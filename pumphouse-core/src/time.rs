//! Clock abstraction
//!
//! Records are stamped with wall-clock seconds at push time. Before the
//! controller has synced time the stamps may be wrong; they are delivered
//! as-is. The trait exists so tests can pin time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now_unix(&self) -> u64;
}

/// System wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Settable clock for tests, shareable across threads
pub struct FixedClock(AtomicU64);

impl FixedClock {
    /// Clock pinned at `unix_secs`
    pub fn new(unix_secs: u64) -> Self {
        Self(AtomicU64::new(unix_secs))
    }

    /// Jump to `unix_secs`
    pub fn set(&self, unix_secs: u64) {
        self.0.store(unix_secs, Ordering::Relaxed);
    }

    /// Move forward by `secs`
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(100);
        assert_eq!(clock.now_unix(), 100);
        clock.advance(5);
        assert_eq!(clock.now_unix(), 105);
        clock.set(1);
        assert_eq!(clock.now_unix(), 1);
    }
}
