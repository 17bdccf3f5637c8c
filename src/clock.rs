// ABOUTME: Injected time and randomness so the sweeper is deterministic under test
// ABOUTME: Production code uses SystemClock/RandomJitter; tests swap in the manual doubles

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

/// A source of "now". Swapped for [`ManualClock`] in tests so sweeper
/// timing doesn't depend on wall-clock sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        // Routed through tokio's clock (rather than `Instant::now()` directly)
        // so `tokio::time::pause()`/`advance()` can drive the sweeper
        // deterministically in integration tests.
        tokio::time::Instant::now().into_std()
    }
}

/// A clock that only moves when told to. `now()` is `base + offset`;
/// `advance` bumps `offset`.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.offset_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Source of the sweeper's per-tick jitter draw: a uniform offset in
/// `[-fuzz/2, +fuzz/2]` milliseconds.
pub trait JitterSource: Send + Sync + std::fmt::Debug {
    fn jitter_ms(&self, fuzz_ms: u32) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter_ms(&self, fuzz_ms: u32) -> i64 {
        if fuzz_ms == 0 {
            return 0;
        }
        let half = fuzz_ms as i64 / 2;
        rand::thread_rng().gen_range(-half..=half)
    }
}

/// Always returns the same offset. Used in tests that need a
/// deterministic sweep interval.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub i64);

impl JitterSource for FixedJitter {
    fn jitter_ms(&self, _fuzz_ms: u32) -> i64 {
        self.0
    }
}
