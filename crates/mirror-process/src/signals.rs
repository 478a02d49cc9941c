//! POSIX SIGTERM handling (spec §4.7). Windows has no signal translation
//! step — the platform's own teardown invokes the supervisor directly.

use std::sync::Arc;

use crate::Supervisor;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use nix::sys::signal::{self, SigHandler, Signal};

    static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_sigterm(_signum: i32) {
        // Signal-handler context: only touch an atomic, nothing that can block.
        TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn install(supervisor: Arc<Supervisor>) {
        // SAFETY: `on_sigterm` only performs an atomic store, which is
        // async-signal-safe.
        unsafe {
            if let Err(e) = signal::signal(Signal::SIGTERM, SigHandler::Handler(on_sigterm)) {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        }

        thread::spawn(move || loop {
            if TERMINATE_REQUESTED.load(Ordering::SeqCst) {
                supervisor.kill_and_reap();
                std::process::exit(143); // 128 + SIGTERM
            }
            thread::sleep(Duration::from_millis(100));
        });
    }
}

#[cfg(not(unix))]
mod unix_impl {
    use super::*;

    pub fn install(_supervisor: Arc<Supervisor>) {}
}

/// Installs the platform's termination handling for `supervisor`. A no-op
/// on non-POSIX platforms.
pub fn install_termination_handler(supervisor: Arc<Supervisor>) {
    unix_impl::install(supervisor);
}
