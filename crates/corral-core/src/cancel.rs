//! Cooperative cancellation (§5 "Cancellation"). A single token is shared
//! (cloned cheaply via `Arc`) between the CLI's signal handler, the worker
//! pool, and every blocking call a worker makes (git subprocess, HTTP
//! request, retry backoff sleep) so a `Ctrl-C` unwinds promptly instead of
//! waiting for in-flight work to finish on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    signal: Arc<(Mutex<()>, Condvar)>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            signal: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.signal;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Block for up to `timeout`, waking early if cancellation fires.
    /// Returns `true` if woken by cancellation, `false` on plain timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let (lock, cvar) = &*self.signal;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, _result) = cvar
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|e| e.into_inner());
        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_timeout_returns_false_without_cancellation() {
        let token = CancellationToken::new();
        let woke_for_cancel = token.wait_timeout(Duration::from_millis(20));
        assert!(!woke_for_cancel);
    }

    #[test]
    fn wait_timeout_wakes_early_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let woke_for_cancel = handle.join().unwrap();
        assert!(woke_for_cancel);
    }
}
