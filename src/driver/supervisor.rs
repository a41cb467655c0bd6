//! Daemon supervisor: boot, serve, restart, exit.
//!
//! Owns the engine (so frame counters survive restarts) and wraps session
//! lifecycles: the first boot is fatal on failure, later boots retry every
//! polling interval until the modem comes back or a shutdown is requested.

use std::thread;
use std::time::Duration;

use log::{error, info};
use nix::unistd::Pid;

use crate::constants::POLLING_INTERVAL;
use crate::error::Result;
use crate::hal::{daemon, SignalFlags};

use super::config::MuxConfig;
use super::mux::Mux;
use super::session::{LoopOutcome, Session};

/// Delay between tearing a dead session down and the next open attempt.
const RESTART_SETTLE: Duration = Duration::from_secs(1);

/// Top-level daemon driver.
pub struct Supervisor {
    config: MuxConfig,
    signals: SignalFlags,
    mux: Mux,
    startup_parent: Option<Pid>,
}

impl Supervisor {
    /// Build the supervisor for a validated configuration.
    #[must_use]
    pub fn new(config: MuxConfig, signals: SignalFlags) -> Self {
        let mux = Mux::new(
            config.num_channels(),
            config.max_frame_size,
            config.fault_tolerant,
        );
        Self { config, signals, mux, startup_parent: None }
    }

    /// Notify `parent` with SIGHUP once the first bring-up succeeds (the
    /// `-w` handshake).
    #[must_use]
    pub fn with_startup_notification(mut self, parent: Option<Pid>) -> Self {
        self.startup_parent = parent;
        self
    }

    /// Run until an orderly shutdown.
    ///
    /// # Errors
    /// First-boot failures, and runtime failures outside fault-tolerant
    /// mode.
    pub fn run(&mut self) -> Result<()> {
        let mut outcome = self.boot_and_serve(true)?;

        loop {
            match outcome {
                LoopOutcome::Terminated => break,
                LoopOutcome::Restart => {
                    outcome = self.restart_until_up();
                }
            }
        }

        let (received, dropped) = self.mux.stats();
        info!(
            "received {received} frames and dropped {dropped} received frames \
             during the mux-mode"
        );
        Ok(())
    }

    /// One session lifecycle. Devices are opened, the loop runs, and the
    /// session's descriptors are released when it ends — whichever way.
    fn boot_and_serve(&mut self, first: bool) -> Result<LoopOutcome> {
        let mut session = Session::open(&self.config, &self.signals, &mut self.mux)?;
        if first {
            if let Some(parent) = self.startup_parent {
                daemon::notify_parent(parent);
            } else if self.config.debug {
                info!("you can quit the MUX daemon with SIGINT or SIGTERM");
            }
        }
        session.serve()
    }

    /// The fault-tolerant re-init loop: keep trying until the modem answers
    /// again or a shutdown request arrives.
    fn restart_until_up(&mut self) -> LoopOutcome {
        loop {
            thread::sleep(RESTART_SETTLE);
            if self.signals.terminate() {
                return LoopOutcome::Terminated;
            }
            match self.boot_and_serve(false) {
                Ok(outcome) => return outcome,
                Err(e) => error!("restarting the mux failed: {e}"),
            }
            if self.signals.terminate() {
                return LoopOutcome::Terminated;
            }
            thread::sleep(POLLING_INTERVAL);
        }
    }

    /// Lifetime (received, dropped) frame counters.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        self.mux.stats()
    }
}
