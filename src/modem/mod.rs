//! Modem profiles.
//!
//! Modem families differ only in the AT preamble that wakes them up and
//! switches them into mux mode; everything after `AT+CMUX` is identical. The
//! [`ModemProfile`] trait captures that single seam, with one implementation
//! per family. Profiles talk to the port through
//! [`ModemPort`](crate::hal::ModemPort), so they are exercised in tests with
//! scripted doubles.
//!
//! # Supported families
//!
//! - [`Mc35`]: Siemens MC35/MC35i (also selected by `mc75`)
//! - [`Irz52it`]: iRZ 52iT
//! - [`Generic`]: anything that only needs `AT+CMUX` (Sony-Ericsson and
//!   friends)

use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::constants::{CLOSE_MUX, UIH};
use crate::driver::config::MuxConfig;
use crate::error::SetupError;
use crate::frame::write_frame;
use crate::hal::ModemPort;

pub mod generic;
pub mod irz52it;
pub mod mc35;

pub use generic::Generic;
pub use irz52it::Irz52it;
pub use mc35::Mc35;

/// How many readiness rounds one AT command waits for its reply.
const AT_POLL_ROUNDS: usize = 100;

/// Per-round reply timeout for ordinary commands.
pub(crate) const AT_COMMAND_STEP: Duration = Duration::from_micros(10_000);

/// Per-round reply timeout for `AT+CPIN` (SIM checks are slow).
pub(crate) const AT_PIN_STEP: Duration = Duration::from_micros(20_000);

// =============================================================================
// Profile selection
// =============================================================================

/// Modem family named by `-m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModemType {
    /// Siemens MC35 family.
    Mc35,
    /// iRZ 52iT.
    Irz52it,
    /// Plain `AT+CMUX` modems.
    #[default]
    Generic,
}

impl ModemType {
    /// Resolve a `-m` argument. `mc75` selects the MC35 preamble.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mc35" | "mc75" => Some(ModemType::Mc35),
            "irz52it" => Some(ModemType::Irz52it),
            "generic" => Some(ModemType::Generic),
            _ => None,
        }
    }

    /// Canonical profile name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ModemType::Mc35 => "mc35",
            ModemType::Irz52it => "irz52it",
            ModemType::Generic => "generic",
        }
    }

    /// Run the family's preamble on `port`.
    ///
    /// # Errors
    /// [`SetupError::MuxRejected`] when the modem refuses `AT+CMUX`.
    pub fn run_setup<P: ModemPort>(
        self,
        port: &mut P,
        config: &MuxConfig,
    ) -> Result<(), SetupError> {
        match self {
            ModemType::Mc35 => Mc35.setup(port, config),
            ModemType::Irz52it => Irz52it.setup(port, config),
            ModemType::Generic => Generic.setup(port, config),
        }
    }
}

/// One modem family's bring-up sequence.
pub trait ModemProfile {
    /// Profile name as used by `-m`.
    fn name(&self) -> &'static str;

    /// Wake the modem, apply family-specific options and switch it into mux
    /// mode with `AT+CMUX`.
    ///
    /// # Errors
    /// [`SetupError::MuxRejected`] when the final `AT+CMUX` is not confirmed.
    fn setup<P: ModemPort>(&self, port: &mut P, config: &MuxConfig)
        -> Result<(), SetupError>;
}

// =============================================================================
// Shared AT helpers
// =============================================================================

/// Send one AT command and wait for `OK`.
///
/// After writing, the reply is polled in up to [`AT_POLL_ROUNDS`] short
/// rounds. Each chunk read is scanned for `OK`/`ERROR` as raw bytes anywhere
/// in the data, so line noise before the first response does not confuse the
/// dialog.
pub(crate) fn at_command<P: ModemPort>(port: &mut P, command: &str, step: Duration) -> bool {
    debug!("sending {:?}", command.trim_end());
    if let Err(e) = port.write_all(command.as_bytes()) {
        debug!("AT command write failed: {e}");
        return false;
    }
    let _ = port.drain();
    thread::sleep(port.settle_delay());

    let mut buf = [0u8; 1024];
    for _ in 0..AT_POLL_ROUNDS {
        match port.wait_readable(step) {
            Ok(true) => {}
            _ => continue,
        }
        let count = match port.read(&mut buf) {
            Ok(n) => n,
            Err(_) => continue,
        };
        if count == 0 {
            continue;
        }
        debug!("read {count} bytes of modem response");
        if find_in_buf(&buf[..count], b"OK") {
            return true;
        }
        if find_in_buf(&buf[..count], b"ERROR") {
            return false;
        }
    }
    false
}

/// Bounded substring scan over raw bytes; the haystack is binary and never
/// NUL-terminated.
pub(crate) fn find_in_buf(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// The initial `AT` probe. When it goes unanswered the mux mode may still be
/// up from a previous run, so a close-down command is sent in-mux and the
/// probe repeated.
pub(crate) fn probe<P: ModemPort>(port: &mut P, config: &MuxConfig) {
    if !at_command(port, "AT\r\n", AT_COMMAND_STEP) {
        info!("modem does not respond to AT commands, trying to close mux mode");
        let _ = write_frame(port, 0, &CLOSE_MUX, UIH, config.max_frame_size);
        at_command(port, "AT\r\n", AT_COMMAND_STEP);
    }
}

/// Feed the SIM PIN during the preamble. Some modems (WebBox) hang when the
/// code arrives on a virtual channel instead.
pub(crate) fn send_pin<P: ModemPort>(port: &mut P, config: &MuxConfig, quoted: bool) {
    if let Some(pin) = config.pin_code {
        let command = if quoted {
            format!("AT+CPIN=\"{pin}\"\r\n")
        } else {
            format!("AT+CPIN={pin}\r\n")
        };
        if !at_command(port, &command, AT_PIN_STEP) {
            debug!("AT+CPIN was not confirmed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_buf_sees_needle_behind_garbage() {
        assert!(find_in_buf(b"\x00\xF9garbage\r\nOK\r\n", b"OK"));
        assert!(find_in_buf(b"ERROR", b"ERROR"));
        assert!(!find_in_buf(b"\r\nOK\r\n", b"ERROR"));
        assert!(!find_in_buf(b"O", b"OK"));
        assert!(!find_in_buf(b"", b"OK"));
        assert!(!find_in_buf(b"anything", b""));
    }

    #[test]
    fn find_in_buf_handles_split_prefixes() {
        // a failed partial match must not eat the real one
        assert!(find_in_buf(b"OOK", b"OK"));
        assert!(find_in_buf(b"ERRERROR", b"ERROR"));
    }

    #[test]
    fn modem_names_resolve() {
        assert_eq!(ModemType::from_name("mc35"), Some(ModemType::Mc35));
        assert_eq!(ModemType::from_name("mc75"), Some(ModemType::Mc35));
        assert_eq!(ModemType::from_name("irz52it"), Some(ModemType::Irz52it));
        assert_eq!(ModemType::from_name("generic"), Some(ModemType::Generic));
        assert_eq!(ModemType::from_name("webbox"), None);
        assert_eq!(ModemType::Mc35.name(), "mc35");
    }
}
