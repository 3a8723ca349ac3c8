//! Monotonic time sources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A free-running microsecond counter.
pub trait ClockSource: Send + Sync {
    /// Microseconds since some fixed point. Never decreases.
    fn micros(&self) -> u64;
}

/// Wall-clock time on the host.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    epoch: Instant,
}
impl HostClock {
    pub fn new() -> Self {
        HostClock { epoch: Instant::now() }
    }
}
impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}
impl ClockSource for HostClock {
    fn micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}
impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock { now: AtomicU64::new(start) }
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::AcqRel);
    }

    /// Move the clock to `us`. Attempts to move it backwards are ignored.
    pub fn set(&self, us: u64) {
        self.now.fetch_max(us, Ordering::AcqRel);
    }
}
impl ClockSource for ManualClock {
    fn micros(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
