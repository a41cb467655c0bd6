//! Protocol constants and daemon tunables.
//!
//! Frame-level values come from 3GPP TS 27.010 (basic mode); the daemon
//! tunables (buffer sizing, retry counts, polling cadence) are grouped here
//! so the rest of the crate never hard-codes magic numbers.

use std::time::Duration;

// =============================================================================
// Basic-mode framing
// =============================================================================

/// Opening/closing frame flag byte.
pub const F_FLAG: u8 = 0xF9;

/// Extension (stop) bit used in the address byte, control-message type byte
/// and multi-byte length fields.
pub const EA: u8 = 0x01;

/// Command/response bit in the address byte and control-message type byte.
pub const CR: u8 = 0x02;

/// Poll/Final bit in the control field.
pub const PF: u8 = 0x10;

/// Set Asynchronous Balanced Mode (channel establishment request).
pub const SABM: u8 = 0x2F;

/// Unnumbered Acknowledgement.
pub const UA: u8 = 0x63;

/// Disconnected Mode (establishment refused / already closed).
pub const DM: u8 = 0x0F;

/// Disconnect request.
pub const DISC: u8 = 0x43;

/// Unnumbered Information.
pub const UI: u8 = 0x03;

/// Unnumbered Information with Header check (payload not covered by FCS).
pub const UIH: u8 = 0xEF;

/// Highest DLCI encodable in the 6-bit address field.
pub const MAX_DLCI: u8 = 63;

// =============================================================================
// Control-channel message types (DLC 0)
// =============================================================================

/// Multiplexer close-down.
pub const C_CLD: u8 = 0xC1;

/// Test command (loopback ping).
pub const C_TEST: u8 = 0x21;

/// Modem status command.
pub const C_MSC: u8 = 0xE1;

/// Non-supported command response.
pub const C_NSC: u8 = 0x11;

// =============================================================================
// V.24 signal bits carried by C_MSC
// =============================================================================

/// Flow control: set when the sender cannot accept frames.
pub const S_FC: u8 = 0x02;

/// Ready To Communicate.
pub const S_RTC: u8 = 0x04;

/// Ready To Receive.
pub const S_RTR: u8 = 0x08;

/// Incoming Call indicator (ring).
pub const S_IC: u8 = 0x40;

/// Data Valid.
pub const S_DV: u8 = 0x80;

// =============================================================================
// Daemon tunables
// =============================================================================

/// Default information-field ceiling (the limit of the Sony-Ericsson GM47).
pub const DEFAULT_FRAME_SIZE: usize = 31;

/// Largest accepted `-f` value; bounded well below the receive buffer so two
/// maximum frames plus headers always fit.
pub const MAX_FRAME_SIZE_LIMIT: usize = 512;

/// Receive ring capacity in bytes.
pub const RX_BUFFER_SIZE: usize = 2048;

/// Upper bound on data channels; the address field would allow 63.
pub const MAX_CHANNELS: usize = 32;

/// How many times a UIH data frame is retried after a short serial write.
pub const WRITE_RETRIES: usize = 5;

/// Serial read chunk per loop iteration.
pub const SERIAL_READ_CHUNK: usize = 4096;

/// Readiness-wait timeout per loop iteration.
pub const LOOP_TIMEOUT_MS: u16 = 1000;

/// Delay between restart attempts, and the base of the ping schedule.
pub const POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive unanswered pings before the modem is declared dead.
pub const MAX_PINGS: u32 = 4;

/// Control-channel liveness probe payload (vendor ping).
pub const PING_PAYLOAD: [u8; 6] = [0x23, 0x09, b'P', b'I', b'N', b'G'];

/// Siemens version probe announcing multiplexer version 2 support, sent as a
/// UIH on DLC 0 once the control channel opens.
pub const VERSION_PROBE: [u8; 18] = *b"\x23\x21\x04TEMUXVERSION2\x00\x00";

/// Close-down command payload (`C_CLD | CR` plus an empty length field).
pub const CLOSE_MUX: [u8; 2] = [C_CLD | CR, EA];

// =============================================================================
// Baud rates
// =============================================================================

/// Baud rates accepted by `-b`. Index 0 means "leave the port speed alone";
/// the index doubles as the speed parameter of `AT+CMUX=0,0,<idx>`.
pub const BAUDRATES: [u32; 8] = [0, 9600, 19200, 38400, 57600, 115200, 230400, 460800];

/// Index of `baud` in [`BAUDRATES`], or `None` if unsupported.
#[must_use]
pub fn baud_index(baud: u32) -> Option<usize> {
    BAUDRATES.iter().position(|&b| b == baud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_index_known_rates() {
        assert_eq!(baud_index(0), Some(0));
        assert_eq!(baud_index(9600), Some(1));
        assert_eq!(baud_index(460800), Some(7));
    }

    #[test]
    fn baud_index_rejects_unknown() {
        assert_eq!(baud_index(1200), None);
        assert_eq!(baud_index(921600), None);
    }

    #[test]
    fn version_probe_layout() {
        assert_eq!(VERSION_PROBE.len(), 18);
        assert_eq!(&VERSION_PROBE[..3], &[0x23, 0x21, 0x04]);
        assert_eq!(&VERSION_PROBE[3..16], b"TEMUXVERSION2");
    }

    #[test]
    fn close_mux_is_a_command() {
        assert_eq!(CLOSE_MUX[0] & CR, CR);
        assert_eq!(CLOSE_MUX[1], EA);
    }
}
