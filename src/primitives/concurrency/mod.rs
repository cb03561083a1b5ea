#![forbid(unsafe_code)]
//! Cooperative interruption for blocking waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::BackendError;

/// Shared interruption flag, the cancellation signal for retry sleeps.
///
/// Cloning yields a handle to the same flag. Once set, the flag stays set until
/// [`Interrupt::clear`] is called, so callers further up can still observe it.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptState>,
}

#[derive(Default)]
struct InterruptState {
    flag: Mutex<bool>,
    wake: Condvar,
}

impl Interrupt {
    /// Creates a handle with the flag cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper.
    pub fn interrupt(&self) {
        let mut flag = self.inner.flag.lock();
        *flag = true;
        self.inner.wake.notify_all();
    }

    /// Returns whether the flag is set.
    pub fn is_interrupted(&self) -> bool {
        *self.inner.flag.lock()
    }

    /// Clears the flag, returning its previous value.
    pub fn clear(&self) -> bool {
        std::mem::replace(&mut *self.inner.flag.lock(), false)
    }

    /// Blocks for `duration` unless interrupted first.
    ///
    /// Fails with [`BackendError::Interrupted`] if the flag is set before or during the wait.
    pub fn sleep(&self, duration: Duration) -> Result<(), BackendError> {
        let deadline = Instant::now() + duration;
        let mut flag = self.inner.flag.lock();
        loop {
            if *flag {
                return Err(BackendError::Interrupted);
            }
            if self.inner.wake.wait_until(&mut flag, deadline).timed_out() {
                return if *flag {
                    Err(BackendError::Interrupted)
                } else {
                    Ok(())
                };
            }
        }
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
