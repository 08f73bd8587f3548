//! Signal handling: SIGTERM/SIGINT graceful stop, SIGUSR1 immediate cycle.
//!
//! Uses the `signal-hook` crate for safe signal registration. The runner
//! polls `SignalHandler` flags at every cycle boundary and every 1-second
//! sleep tick rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Thread-safe signal state shared between the signal handler and the
/// runner loop.
///
/// All flags use `Ordering::Relaxed` because the loop polls them every
/// iteration and exact ordering with other atomics is not required.
#[derive(Clone)]
pub struct SignalHandler {
    stop_flag: Arc<AtomicBool>,
    cycle_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a new handler and register OS signal hooks.
    ///
    /// SIGTERM/SIGINT -> stop, SIGUSR1 -> immediate cycle. Registration is
    /// best-effort; failures are logged to stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Create a handler with no OS hooks (programmatic control only).
    pub fn unregistered() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
            cycle_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether a stop has been requested.
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate cycle has been requested.
    pub fn should_run_cycle(&self) -> bool {
        self.cycle_flag.swap(false, Ordering::Relaxed)
    }

    /// Programmatically request a stop (used by embedders and tests).
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Programmatically request an immediate cycle.
    pub fn request_cycle(&self) {
        self.cycle_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.stop_flag)) {
            eprintln!("[SIW-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.stop_flag)) {
            eprintln!("[SIW-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.cycle_flag)) {
                eprintln!("[SIW-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
