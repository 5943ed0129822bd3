//! Wall-clock abstraction shared by the probe engine and artifact cache.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time.
///
/// Injected wherever expiry or timestamps matter so tests can move time
/// forward without sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Returns whole seconds since the Unix epoch, or 0 if the clock is before it.
    fn unix_secs(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock pinned to a fixed offset from the real time.
///
/// Useful for exercising expiry paths: an offset of ten minutes makes every
/// freshly written cache entry look ten minutes old.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetClock {
    offset: Duration,
}

impl OffsetClock {
    /// Creates a clock that runs `offset` ahead of the system clock.
    #[must_use]
    pub fn ahead(offset: Duration) -> Self {
        Self { offset }
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> SystemTime {
        SystemTime::now() + self.offset
    }
}
