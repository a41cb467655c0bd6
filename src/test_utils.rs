//! Testing doubles and helpers.
//!
//! In-memory stand-ins for the serial link, the endpoint set and the modem
//! port, so the engine and the profiles run on the host without hardware.

#![allow(missing_docs)]

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::buffer::RxBuffer;
use crate::constants::{PF, UA};
use crate::driver::mux::{DataSink, Mux};
use crate::frame::{write_frame, Frame};
use crate::hal::ModemPort;

// =============================================================================
// Frame-level helpers
// =============================================================================

/// Decode every frame in `bytes`, asserting the stream is well formed.
pub fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let mut rx = RxBuffer::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let accepted = rx.write(&bytes[offset..]);
        offset += accepted;
        let before = frames.len();
        while let Some(frame) = rx.get_frame() {
            frames.push(frame);
        }
        assert!(
            accepted > 0 || frames.len() > before,
            "decode_all made no progress at offset {offset}"
        );
    }
    while let Some(frame) = rx.get_frame() {
        frames.push(frame);
    }
    frames
}

/// Drive a channel into the OPEN state through the public protocol surface
/// (inject a UA, as if the peer acknowledged our SABM).
pub fn open_channel(mux: &mut Mux, channel: u8) {
    let mut encoded = Vec::new();
    write_frame(&mut encoded, channel, &[], UA | PF, 31).unwrap();
    mux.feed(&encoded);
    let mut out = Vec::new();
    let mut sink = RecordingSink::default();
    mux.drain_frames(&mut out, &mut sink).unwrap();
    assert!(mux.channel(channel as usize).opened, "channel {channel} did not open");
}

// =============================================================================
// Sinks and links
// =============================================================================

/// Records payload deliveries per endpoint.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub deliveries: Vec<(usize, Vec<u8>)>,
}

impl DataSink for RecordingSink {
    fn deliver(&mut self, endpoint: usize, data: &[u8]) {
        self.deliveries.push((endpoint, data.to_vec()));
    }
}

/// A link that refuses the first `refusals` writes with a zero-length
/// result, then accepts everything.
#[derive(Debug)]
pub struct FlakyLink {
    refusals: usize,
    pub sent: Vec<u8>,
}

impl FlakyLink {
    pub fn new(refusals: usize) -> Self {
        Self { refusals, sent: Vec::new() }
    }
}

impl Write for FlakyLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Ok(0);
        }
        self.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Scripted modem port
// =============================================================================

/// A modem that answers `OK` to every AT command, except the ones scripted
/// to fail (`ERROR`) or stay silent. Binary writes (mux frames) are recorded
/// but never answered.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    pub writes: Vec<Vec<u8>>,
    pending: Vec<u8>,
    error_on: Vec<&'static str>,
    silent_on: Vec<&'static str>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `ERROR` to commands starting with `prefix`.
    pub fn fail_on(mut self, prefix: &'static str) -> Self {
        self.error_on.push(prefix);
        self
    }

    /// Never answer commands starting with `prefix`.
    pub fn silent_on(mut self, prefix: &'static str) -> Self {
        self.silent_on.push(prefix);
        self
    }

    /// The AT commands written so far, in order.
    pub fn at_commands(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter_map(|bytes| {
                let text = String::from_utf8(bytes.clone()).ok()?;
                text.starts_with("AT").then_some(text)
            })
            .collect()
    }

    /// Whether any non-AT (framed) bytes were written.
    pub fn wrote_frame_bytes(&self) -> bool {
        self.writes
            .iter()
            .any(|bytes| !bytes.starts_with(b"AT"))
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        if let Ok(text) = std::str::from_utf8(buf) {
            if text.starts_with("AT") {
                if self.silent_on.iter().any(|p| text.starts_with(p)) {
                    // no reply
                } else if self.error_on.iter().any(|p| text.starts_with(p)) {
                    self.pending.extend_from_slice(b"\r\nERROR\r\n");
                } else {
                    self.pending.extend_from_slice(b"\r\nOK\r\n");
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.pending.len().min(buf.len());
        buf[..count].copy_from_slice(&self.pending[..count]);
        self.pending.drain(..count);
        Ok(count)
    }
}

impl ModemPort for ScriptedPort {
    fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.pending.is_empty())
    }

    fn settle_delay(&self) -> Duration {
        Duration::ZERO
    }
}
