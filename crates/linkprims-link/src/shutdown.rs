use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Termination flag with interruptible sleeps.
///
/// Workers check it at the top of every iteration and sleep through it, so
/// a shutdown is observed at every sleep boundary instead of after a full
/// retry interval.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask every worker to stop.
    pub fn trigger(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    /// Re-arm for a new connect.
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `duration` unless triggered first. Returns true if the
    /// signal is triggered. A duration past the representable deadline
    /// sleeps until triggered.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut triggered = self.lock();
        while !*triggered {
            triggered = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match self.wake.wait_timeout(triggered, remaining) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .wake
                    .wait(triggered)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
        *triggered
    }
}
