//! Signal wiring.
//!
//! Handlers never do work: each delivery stores into an atomic flag the
//! supervisory loop samples at the top of its iteration. SIGHUP is latched
//! into a flag nobody reads so it cannot kill the daemon (the parent process
//! uses it as the startup handshake); SIGPIPE exits cleanly.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGTERM, SIGUSR1};
use signal_hook::flag;

/// Async-signal-safe daemon control flags.
#[derive(Clone)]
pub struct SignalFlags {
    terminate: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Install handlers for the daemon's signal set.
    ///
    /// # Errors
    /// Propagates registration failures (invalid or forbidden signals).
    pub fn install() -> io::Result<Self> {
        let terminate = Arc::new(AtomicBool::new(false));
        for signal in [SIGINT, SIGTERM, SIGUSR1] {
            flag::register(signal, Arc::clone(&terminate))?;
        }
        flag::register(SIGHUP, Arc::new(AtomicBool::new(false)))?;
        flag::register_conditional_shutdown(SIGPIPE, 0, Arc::new(AtomicBool::new(true)))?;
        Ok(Self { terminate })
    }

    /// Flags with no handlers attached, for embedding and tests.
    #[must_use]
    pub fn detached() -> Self {
        Self { terminate: Arc::new(AtomicBool::new(false)) }
    }

    /// Has a shutdown been requested?
    #[must_use]
    pub fn terminate(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    /// Request a shutdown from daemon code (endpoint reopen failure,
    /// out-of-resource conditions).
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }
}
