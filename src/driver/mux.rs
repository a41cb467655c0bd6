//! Multiplexer engine: channel table and link state machine.
//!
//! The engine owns the per-DLC state and the receive buffer, but no file
//! descriptors — every operation is handed the serial link (anything
//! [`Write`]) and a [`DataSink`] for payload delivery, so the state machine
//! is exercised in tests with in-memory doubles exactly as on the wire.

use std::io::{self, Write};

use log::{debug, error, info};

use crate::buffer::RxBuffer;
use crate::constants::{
    DM, EA, PF, S_DV, S_RTC, S_RTR, UA, UIH, VERSION_PROBE, WRITE_RETRIES,
};
use crate::frame::{write_frame, Frame, FrameKind};

// =============================================================================
// Channel table
// =============================================================================

/// Per-DLC link state. Entry 0 is the control channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelState {
    /// The DLC has been established (SABM/UA handshake completed).
    pub opened: bool,
    /// Cached V.24 signal bits, as asserted locally or last reported by the
    /// modem via a modem status command.
    pub v24_signals: u8,
}

impl ChannelState {
    const fn closed() -> Self {
        Self { opened: false, v24_signals: S_DV | S_RTR | S_RTC | EA }
    }
}

/// Payload consumer for information frames on data channels.
///
/// Implemented by the endpoint set in the daemon and by recording doubles in
/// tests. Delivery is fire-and-forget: a failing endpoint surfaces through
/// its own read path, not here.
pub trait DataSink {
    /// Hand `data` to endpoint `endpoint` (zero-based, i.e. DLC index - 1).
    fn deliver(&mut self, endpoint: usize, data: &[u8]);
}

// =============================================================================
// Engine
// =============================================================================

/// Channel table, receive buffer and frame-level reactions.
pub struct Mux {
    channels: Vec<ChannelState>,
    rx: RxBuffer,
    max_frame_size: usize,
    fault_tolerant: bool,
    terminate_requested: bool,
    skip_channel_disc: bool,
    restart_requested: bool,
}

impl Mux {
    /// Engine for `num_channels` data channels plus the control channel.
    #[must_use]
    pub fn new(num_channels: usize, max_frame_size: usize, fault_tolerant: bool) -> Self {
        Self {
            channels: vec![ChannelState::closed(); num_channels + 1],
            rx: RxBuffer::new(),
            max_frame_size,
            fault_tolerant,
            terminate_requested: false,
            skip_channel_disc: false,
            restart_requested: false,
        }
    }

    /// Return to the just-booted state: all channels closed, receive buffer
    /// emptied, pending supervisor requests cleared. Used on restart.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            *channel = ChannelState::closed();
        }
        self.rx.reset();
        self.terminate_requested = false;
        self.skip_channel_disc = false;
        self.restart_requested = false;
    }

    /// State of one channel.
    #[must_use]
    pub fn channel(&self, index: usize) -> &ChannelState {
        &self.channels[index]
    }

    /// Number of table entries (data channels + control channel).
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Writable space left in the receive buffer.
    #[must_use]
    pub fn rx_free(&self) -> usize {
        self.rx.free()
    }

    /// Lifetime (received, dropped) frame counters.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.rx.received_count(), self.rx.dropped_count())
    }

    /// A peer event asked the daemon to terminate.
    #[must_use]
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested
    }

    /// The mux mode is already gone, so per-channel DISCs can be skipped
    /// during shutdown.
    #[must_use]
    pub fn skip_channel_disc(&self) -> bool {
        self.skip_channel_disc
    }

    /// The peer closed the mux down and fault-tolerant mode wants a re-init.
    #[must_use]
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    pub(crate) fn set_fault_response(&mut self) {
        if self.fault_tolerant {
            self.restart_requested = true;
        } else {
            self.terminate_requested = true;
            self.skip_channel_disc = true;
        }
    }

    pub(crate) fn record_signals(&mut self, channel: usize, signals: u8) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.v24_signals = signals;
        }
    }

    /// Append raw serial bytes to the receive buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        self.rx.write(bytes)
    }

    /// Encode and send one frame with the configured frame-size ceiling.
    ///
    /// Returns the number of payload bytes framed; 0 flags a transient short
    /// write (retry the whole frame later).
    ///
    /// # Errors
    /// Propagates hard I/O errors from the link.
    pub fn write_frame<L: Write>(
        &self,
        link: &mut L,
        channel: u8,
        data: &[u8],
        control: u8,
    ) -> io::Result<usize> {
        debug!("send frame to channel {channel}");
        write_frame(link, channel, data, control, self.max_frame_size)
    }

    /// Send endpoint bytes as a train of UIH frames on DLC `endpoint + 1`.
    ///
    /// The cursor advances by whatever each frame managed to carry; a short
    /// write costs one of [`WRITE_RETRIES`] attempts. The return value is the
    /// number of bytes actually framed — the caller keeps the rest as
    /// carry-over, so no endpoint byte is ever lost.
    ///
    /// # Errors
    /// Propagates hard I/O errors from the link.
    pub fn send_endpoint_data<L: Write>(
        &self,
        link: &mut L,
        endpoint: usize,
        data: &[u8],
    ) -> io::Result<usize> {
        let channel = (endpoint + 1) as u8;
        let mut written = 0;
        let mut stalls = 0;
        while written < data.len() && stalls < WRITE_RETRIES {
            let framed = self.write_frame(link, channel, &data[written..], UIH)?;
            written += framed;
            if framed == 0 {
                stalls += 1;
            }
        }
        if written < data.len() {
            debug!(
                "couldn't write all data to channel {channel}: {written} of {} bytes",
                data.len()
            );
        }
        Ok(written)
    }

    /// Extract and react to every complete frame in the receive buffer.
    ///
    /// Returns how many frames were handled, so the caller can feed its
    /// liveness clock.
    ///
    /// # Errors
    /// Propagates hard I/O errors raised while sending responses.
    pub fn drain_frames<L: Write, S: DataSink + ?Sized>(
        &mut self,
        link: &mut L,
        sink: &mut S,
    ) -> io::Result<usize> {
        let mut extracted = 0;
        while let Some(frame) = self.rx.get_frame() {
            extracted += 1;
            debug!(
                "received {} frame for channel {} ({} data bytes)",
                frame.kind().name(),
                frame.channel,
                frame.data.len()
            );
            self.on_frame(&frame, link, sink)?;
        }
        Ok(extracted)
    }

    // =========================================================================
    // Link state machine
    // =========================================================================

    fn on_frame<L: Write, S: DataSink + ?Sized>(
        &mut self,
        frame: &Frame,
        link: &mut L,
        sink: &mut S,
    ) -> io::Result<()> {
        let channel = frame.channel as usize;
        if channel >= self.channels.len() {
            error!("frame for unconfigured channel {channel} ignored");
            if frame.kind() == FrameKind::Sabm {
                self.write_frame(link, frame.channel, &[], DM | PF)?;
            }
            return Ok(());
        }

        match frame.kind() {
            FrameKind::Ui | FrameKind::Uih => {
                if channel == 0 {
                    super::control::handle_message(self, frame, link)?;
                } else {
                    debug!("sending data to DLC channel {channel}");
                    sink.deliver(channel - 1, &frame.data);
                }
            }
            FrameKind::Ua => self.on_ua(channel, link)?,
            FrameKind::Dm => self.on_dm(channel),
            FrameKind::Disc => self.on_disc(channel, link)?,
            FrameKind::Sabm => self.on_sabm(channel, link)?,
            FrameKind::Unknown(control) => {
                debug!("unknown frame (control={control:#04x}) for channel {channel}");
            }
        }
        Ok(())
    }

    /// UA acknowledges whichever mode switch we asked for last: SABM when the
    /// channel was closed, DISC when it was open.
    fn on_ua<L: Write>(&mut self, channel: usize, link: &mut L) -> io::Result<()> {
        if self.channels[channel].opened {
            info!("logical channel {channel} closed");
            self.channels[channel].opened = false;
        } else {
            self.channels[channel].opened = true;
            if channel == 0 {
                info!("control channel opened");
                // tell version-2-capable Siemens firmware we exist
                self.write_frame(link, 0, &VERSION_PROBE, UIH)?;
            } else {
                info!("logical channel {channel} opened");
            }
        }
        Ok(())
    }

    fn on_dm(&mut self, channel: usize) {
        if self.channels[channel].opened {
            info!("DM received, so the channel {channel} was already closed");
            self.channels[channel].opened = false;
        } else if channel == 0 {
            info!("couldn't open control channel -> terminating");
            self.terminate_requested = true;
            self.skip_channel_disc = true;
        } else {
            info!("logical channel {channel} couldn't be opened");
        }
    }

    fn on_disc<L: Write>(&mut self, channel: usize, link: &mut L) -> io::Result<()> {
        if self.channels[channel].opened {
            self.channels[channel].opened = false;
            self.write_frame(link, channel as u8, &[], UA | PF)?;
            if channel == 0 {
                info!("control channel closed");
                self.set_fault_response();
            } else {
                info!("logical channel {channel} closed");
            }
        } else {
            info!("received DISC even though channel {channel} was already closed");
            self.write_frame(link, channel as u8, &[], DM | PF)?;
        }
        Ok(())
    }

    fn on_sabm<L: Write>(&mut self, channel: usize, link: &mut L) -> io::Result<()> {
        if self.channels[channel].opened {
            info!("received SABM even though channel {channel} was already open");
        } else if channel == 0 {
            info!("control channel opened");
        } else {
            info!("logical channel {channel} opened");
        }
        self.channels[channel].opened = true;
        self.write_frame(link, channel as u8, &[], UA | PF)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DISC, SABM};
    use crate::test_utils::{decode_all, open_channel, RecordingSink};

    fn mux(channels: usize) -> Mux {
        Mux::new(channels, 31, false)
    }

    fn inject(mux: &mut Mux, channel: u8, data: &[u8], control: u8) -> (Vec<Frame>, RecordingSink) {
        let mut encoded = Vec::new();
        write_frame(&mut encoded, channel, data, control, 512).unwrap();
        mux.feed(&encoded);
        let mut out = Vec::new();
        let mut sink = RecordingSink::default();
        mux.drain_frames(&mut out, &mut sink).unwrap();
        (decode_all(&out), sink)
    }

    #[test]
    fn ua_opens_closed_channel_silently() {
        let mut mux = mux(2);
        let (sent, _) = inject(&mut mux, 1, &[], UA | PF);
        assert!(mux.channel(1).opened);
        assert!(sent.is_empty(), "no outbound frame expected");
    }

    #[test]
    fn sabm_is_answered_with_ua() {
        let mut mux = mux(2);
        let (sent, _) = inject(&mut mux, 2, &[], SABM | PF);
        assert!(mux.channel(2).opened);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, 2);
        assert_eq!(sent[0].control, UA | PF);
    }

    #[test]
    fn control_channel_open_sends_version_probe() {
        let mut mux = mux(1);
        let (sent, _) = inject(&mut mux, 0, &[], UA | PF);
        assert!(mux.channel(0).opened);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, 0);
        assert_eq!(sent[0].control, UIH);
        assert_eq!(sent[0].data, VERSION_PROBE);
    }

    #[test]
    fn ua_on_open_channel_confirms_our_disc() {
        let mut mux = mux(1);
        open_channel(&mut mux, 1);
        let (sent, _) = inject(&mut mux, 1, &[], UA | PF);
        assert!(!mux.channel(1).opened);
        assert!(sent.is_empty());
    }

    #[test]
    fn disc_on_closed_channel_gets_dm() {
        let mut mux = mux(1);
        let (sent, _) = inject(&mut mux, 1, &[], DISC | PF);
        assert!(!mux.channel(1).opened);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].control, DM | PF);
    }

    #[test]
    fn disc_on_open_data_channel_gets_ua() {
        let mut mux = mux(1);
        open_channel(&mut mux, 1);
        let (sent, _) = inject(&mut mux, 1, &[], DISC | PF);
        assert!(!mux.channel(1).opened);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].control, UA | PF);
        assert!(!mux.terminate_requested());
    }

    #[test]
    fn disc_on_control_channel_terminates_without_fault_tolerance() {
        let mut mux = mux(1);
        open_channel(&mut mux, 0);
        let (sent, _) = inject(&mut mux, 0, &[], DISC | PF);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].control, UA | PF);
        assert!(mux.terminate_requested());
        assert!(mux.skip_channel_disc());
        assert!(!mux.restart_requested());
    }

    #[test]
    fn disc_on_control_channel_restarts_when_fault_tolerant() {
        let mut mux = Mux::new(1, 31, true);
        open_channel(&mut mux, 0);
        let (_, _) = inject(&mut mux, 0, &[], DISC | PF);
        assert!(mux.restart_requested());
        assert!(!mux.terminate_requested());
    }

    #[test]
    fn dm_on_closed_control_channel_terminates() {
        let mut mux = mux(1);
        let (sent, _) = inject(&mut mux, 0, &[], DM | PF);
        assert!(sent.is_empty());
        assert!(mux.terminate_requested());
        assert!(mux.skip_channel_disc());
    }

    #[test]
    fn dm_closes_an_open_channel() {
        let mut mux = mux(1);
        open_channel(&mut mux, 1);
        let (sent, _) = inject(&mut mux, 1, &[], DM | PF);
        assert!(sent.is_empty());
        assert!(!mux.channel(1).opened);
        assert!(!mux.terminate_requested());
    }

    #[test]
    fn info_frames_reach_the_endpoint_sink() {
        let mut mux = mux(2);
        open_channel(&mut mux, 2);
        let (sent, sink) = inject(&mut mux, 2, b"ATD*99#", UIH);
        assert!(sent.is_empty());
        assert_eq!(sink.deliveries, vec![(1usize, b"ATD*99#".to_vec())]);
    }

    #[test]
    fn sabm_for_unconfigured_channel_is_refused() {
        let mut mux = mux(1);
        let (sent, _) = inject(&mut mux, 9, &[], SABM | PF);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, 9);
        assert_eq!(sent[0].control, DM | PF);
    }

    #[test]
    fn endpoint_data_is_segmented_in_order() {
        let mux = mux(1);
        let data: Vec<u8> = (0..100u8).collect();
        let mut out = Vec::new();
        let written = mux.send_endpoint_data(&mut out, 0, &data).unwrap();
        assert_eq!(written, data.len());
        let frames = decode_all(&out);
        assert!(frames.len() >= 4);
        let mut joined = Vec::new();
        for frame in &frames {
            assert_eq!(frame.channel, 1);
            assert_eq!(frame.control, UIH);
            assert!(frame.data.len() <= 31);
            joined.extend_from_slice(&frame.data);
        }
        assert_eq!(joined, data);
    }

    #[test]
    fn endpoint_data_reports_carry_over_after_stalls() {
        use crate::test_utils::FlakyLink;
        let mux = mux(1);
        let data = [0x42u8; 64];
        // refuses everything: five stalls, nothing written
        let mut dead = FlakyLink::new(usize::MAX);
        assert_eq!(mux.send_endpoint_data(&mut dead, 0, &data).unwrap(), 0);
        // two stalls, then flows: everything written
        let mut flaky = FlakyLink::new(2);
        assert_eq!(mux.send_endpoint_data(&mut flaky, 0, &data).unwrap(), data.len());
        let frames = decode_all(&flaky.sent);
        let total: usize = frames.iter().map(|f| f.data.len()).sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn reset_closes_channels_and_clears_requests() {
        let mut mux = mux(2);
        open_channel(&mut mux, 1);
        inject(&mut mux, 0, &[], DM | PF);
        assert!(mux.terminate_requested());
        mux.reset();
        assert!(!mux.channel(1).opened);
        assert!(!mux.terminate_requested());
        assert!(!mux.skip_channel_disc());
        assert_eq!(mux.channel(1).v24_signals, S_DV | S_RTR | S_RTC | EA);
    }
}
