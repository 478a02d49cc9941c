//! Owns the one Encoder Child. Spec §3 invariant: the supervisor field is
//! either empty or references a live-or-reaped process — never two
//! processes at once.

use std::process::Child;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long to wait for the child to exit after sending the kill signal
/// before giving up (spec §4.7: "≤ 3 s wait").
const REAP_TIMEOUT: Duration = Duration::from_secs(3);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Thread-safe home for the Encoder Child handle.
#[derive(Default)]
pub struct Supervisor {
    child: Mutex<Option<Child>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly spawned child, replacing (and best-effort
    /// reaping) whatever was there before.
    pub fn register(&self, child: Child) {
        let mut guard = self.child.lock().unwrap();
        if let Some(mut stale) = guard.replace(child) {
            let _ = stale.kill();
            let _ = stale.wait();
        }
    }

    /// True if a child is currently registered (it may already have exited
    /// without being reaped yet).
    pub fn has_registered_child(&self) -> bool {
        self.child.lock().unwrap().is_some()
    }

    /// Best-effort terminate-and-reap the registered child, if any. Safe to
    /// call repeatedly and from any exit path: normal retry-loop teardown,
    /// the SIGTERM watcher, or the end of `main`.
    pub fn kill_and_reap(&self) {
        let mut child = match self.child.lock().unwrap().take() {
            Some(child) => child,
            None => return,
        };

        if let Err(e) = child.kill() {
            tracing::debug!(error = %e, "encoder child already gone");
        }

        let deadline = Instant::now() + REAP_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(REAP_POLL_INTERVAL);
                }
                _ => return,
            }
        }
    }
}
