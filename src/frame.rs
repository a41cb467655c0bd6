//! Basic-mode frame record and encoder.
//!
//! Wire layout (TS 27.010 basic option):
//!
//! ```text
//! F_FLAG | ADDR | CTRL | LEN [| LEN_EXT] | INFO... | FCS | F_FLAG
//! ```
//!
//! The FCS is the reversed CRC-8 (polynomial 0xE0 table form) computed over
//! the header bytes only — address, control and length field. Decoding lives
//! in [`crate::buffer`]; this module owns the frame record, the FCS table and
//! the encoder.

use std::io::{self, Write};

use log::debug;

use crate::constants::{CR, DISC, DM, EA, F_FLAG, MAX_DLCI, PF, SABM, UA, UI, UIH};

// =============================================================================
// FCS
// =============================================================================

/// Residue left by folding a correct header plus its FCS byte through the
/// table.
pub const FCS_GOOD: u8 = 0xCF;

/// Reversed CRC-8 lookup table for the 27.010 FCS.
pub const FCS_TABLE: [u8; 256] = build_fcs_table();

const fn build_fcs_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xE0 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Fold one byte into a running FCS.
#[inline(always)]
#[must_use]
pub fn fcs_step(fcs: u8, byte: u8) -> u8 {
    FCS_TABLE[(fcs ^ byte) as usize]
}

/// Compute the FCS byte to transmit for the given header bytes.
#[must_use]
pub fn make_fcs(header: &[u8]) -> u8 {
    let mut fcs = 0xFFu8;
    for &b in header {
        fcs = fcs_step(fcs, b);
    }
    // ones' complement of the running remainder
    0xFF - fcs
}

// =============================================================================
// Frame record
// =============================================================================

/// Frame type, derived from the control field with the P/F bit masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Channel establishment request.
    Sabm,
    /// Unnumbered acknowledgement.
    Ua,
    /// Disconnected mode.
    Dm,
    /// Disconnect request.
    Disc,
    /// Unnumbered information.
    Ui,
    /// Unnumbered information with header check.
    Uih,
    /// Anything else (logged and otherwise ignored).
    Unknown(u8),
}

impl FrameKind {
    /// Classify a raw control byte.
    #[must_use]
    pub fn from_control(control: u8) -> Self {
        match control & !PF {
            SABM => FrameKind::Sabm,
            UA => FrameKind::Ua,
            DM => FrameKind::Dm,
            DISC => FrameKind::Disc,
            UI => FrameKind::Ui,
            UIH => FrameKind::Uih,
            other => FrameKind::Unknown(other),
        }
    }

    /// Short name for log lines.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Sabm => "SABM",
            FrameKind::Ua => "UA",
            FrameKind::Dm => "DM",
            FrameKind::Disc => "DISC",
            FrameKind::Ui => "UI",
            FrameKind::Uih => "UIH",
            FrameKind::Unknown(_) => "unknown",
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// DLCI, 0..=63. DLC 0 is the control channel.
    pub channel: u8,
    /// Raw control field including the P/F bit.
    pub control: u8,
    /// Information field (may be empty).
    pub data: Vec<u8>,
}

impl Frame {
    /// Frame type with the P/F bit masked off.
    #[inline(always)]
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_control(self.control)
    }

    /// Whether this is a UI or UIH information frame.
    #[must_use]
    pub fn is_info(&self) -> bool {
        matches!(self.kind(), FrameKind::Ui | FrameKind::Uih)
    }

    /// Whether the P/F bit is set.
    #[must_use]
    pub fn poll_final(&self) -> bool {
        self.control & PF != 0
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Write one frame to `link` with the C/R bit set (we are the initiator).
///
/// The payload is truncated to `max_frame_size`; the number of payload bytes
/// actually framed is returned so callers can segment longer buffers.
///
/// The sink must accept each of the (at most) three writes all-or-nothing. A
/// short or would-block write yields `Ok(0)`, meaning "nothing durable went
/// out, retry the whole frame later". Hard I/O errors propagate.
///
/// # Errors
/// Returns the underlying error for any failure other than a short,
/// interrupted or would-block write.
pub fn write_frame<W: Write>(
    link: &mut W,
    channel: u8,
    data: &[u8],
    control: u8,
    max_frame_size: usize,
) -> io::Result<usize> {
    let count = data.len().min(max_frame_size);

    let mut prefix = [F_FLAG, EA | CR, control, 0, 0];
    prefix[1] |= (channel & MAX_DLCI) << 2;

    let prefix_len = if count > 127 {
        prefix[3] = ((count & 127) << 1) as u8;
        prefix[4] = (count >> 7) as u8;
        5
    } else {
        prefix[3] = EA | ((count as u8) << 1);
        4
    };

    let postfix = [make_fcs(&prefix[1..prefix_len]), F_FLAG];

    if !write_all_or_nothing(link, channel, &prefix[..prefix_len], "header")? {
        return Ok(0);
    }
    if count > 0 && !write_all_or_nothing(link, channel, &data[..count], "data")? {
        return Ok(0);
    }
    if !write_all_or_nothing(link, channel, &postfix, "trailer")? {
        return Ok(0);
    }

    Ok(count)
}

/// One sink write; `Ok(false)` flags a transient shortfall.
fn write_all_or_nothing<W: Write>(
    link: &mut W,
    channel: u8,
    bytes: &[u8],
    what: &str,
) -> io::Result<bool> {
    match link.write(bytes) {
        Ok(n) if n == bytes.len() => Ok(true),
        Ok(n) => {
            debug!("short {what} write for channel {channel}: {n} of {} bytes", bytes.len());
            Ok(false)
        }
        Err(e)
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
        {
            debug!("{what} write for channel {channel} would block");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
