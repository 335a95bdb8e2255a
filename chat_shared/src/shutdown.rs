//! Two-phase interrupt handling; idempotent listener stop (§4.6, §5).
//!
//! A second interrupt while already shutting down is absorbed silently —
//! `trigger()` only fires the notification on the first call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sets the stop flag. A second call (already set) is a no-op, so a
    /// repeat interrupt during an already-shutting-down state never
    /// re-enters shutdown or re-notifies waiters.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Resolves once `trigger()` has been called. Returns immediately if
    /// already triggered.
    pub async fn wait(&self) {
        // Register interest before checking the flag, mirroring
        // `reliable_send`'s ordering: a `trigger()` landing between the
        // check and `notified()` would otherwise be missed, since
        // `notify_waiters` only wakes futures that already exist.
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_set());
        shutdown.trigger();
        shutdown.wait().await;
        assert!(shutdown.is_set());
    }

    #[test]
    fn second_trigger_is_a_silent_no_op() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger(); // must not panic or double-fire
        assert!(shutdown.is_set());
    }
}
