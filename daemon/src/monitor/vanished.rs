/// One-shot "root vanished" signal shared between the device monitor (sole
/// writer) and any number of blocking waiters.
///
/// The flag only ever goes from `false` to `true`.  Waiters block on a
/// condition variable and are all released by the same `notify_all`.
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct VanishedState {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    vanished: Mutex<bool>,
    changed: Condvar,
}

impl VanishedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the root device has vanished.
    pub fn is_vanished(&self) -> bool {
        *self
            .inner
            .vanished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Performs the vanish transition and wakes every waiter.
    ///
    /// Returns `true` only for the call that actually flipped the flag.
    pub(super) fn mark_vanished(&self) -> bool {
        let mut vanished = self
            .inner
            .vanished
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *vanished {
            return false;
        }
        *vanished = true;
        self.inner.changed.notify_all();
        true
    }

    /// Blocks the calling thread until the root device has vanished.
    ///
    /// With `timeout = None` this waits indefinitely.  Returns `true` if the
    /// flag is set, `false` if the timeout elapsed first.
    pub fn wait_until_vanished(&self, timeout: Option<Duration>) -> bool {
        let guard = self
            .inner
            .vanished
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match timeout {
            None => {
                let guard = self
                    .inner
                    .changed
                    .wait_while(guard, |vanished| !*vanished)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            }
            Some(timeout) => {
                let (guard, _) = self
                    .inner
                    .changed
                    .wait_timeout_while(guard, timeout, |vanished| !*vanished)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            }
        }
    }
}
