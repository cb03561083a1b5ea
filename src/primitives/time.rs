#![forbid(unsafe_code)]
//! Clock abstraction used for commit timestamps, lock leases and retry deadlines.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use super::concurrency::Interrupt;
use crate::error::BackendError;

/// Source of the current time plus an interruptible sleep.
pub trait TimestampProvider: Send + Sync {
    /// Monotonic instant used for deadlines.
    fn now(&self) -> Instant;
    /// Wall-clock microseconds since the Unix epoch, used as commit time.
    fn time_micros(&self) -> u64;
    /// Sleeps for `duration`, failing early if `interrupt` fires.
    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Result<(), BackendError>;
}

/// Real clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimestamps;

impl TimestampProvider for SystemTimestamps {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn time_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default()
    }

    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Result<(), BackendError> {
        interrupt.sleep(duration)
    }
}

/// Returns the shared real clock.
pub fn system_timestamps() -> Arc<dyn TimestampProvider> {
    Arc::new(SystemTimestamps)
}

/// Virtual clock for deterministic tests: sleeping advances time and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Epoch microseconds reported at elapsed time zero.
    pub const START_MICROS: u64 = 1_000_000;

    /// Creates a clock at elapsed time zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.state.lock().elapsed += by;
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampProvider for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn time_micros(&self) -> u64 {
        Self::START_MICROS + self.state.lock().elapsed.as_micros() as u64
    }

    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Result<(), BackendError> {
        if interrupt.is_interrupted() {
            return Err(BackendError::Interrupted);
        }
        let mut state = self.state.lock();
        state.sleeps.push(duration);
        state.elapsed += duration;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_records_sleeps() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock
            .sleep(Duration::from_millis(50), &Interrupt::new())
            .unwrap();
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now() - start, Duration::from_millis(55));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50)]);
        assert_eq!(clock.time_micros(), ManualClock::START_MICROS + 55_000);
    }

    #[test]
    fn manual_clock_honours_interrupt() {
        let clock = ManualClock::new();
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        assert!(clock.sleep(Duration::from_millis(1), &interrupt).is_err());
        assert!(clock.sleeps().is_empty());
    }
}
