//! One multiplexer session: open devices, fan bytes, shut down.
//!
//! A session owns the serial port and the endpoints for one bring-up of the
//! mux mode; the engine and its counters live in the supervisor and survive
//! restarts. The loop is single-threaded and readiness-driven: one poll over
//! the serial descriptor plus every endpoint, then serial RX, endpoint TX,
//! and finally the supervisory duties (shutdown sequencing, liveness pings).

use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::constants::{
    CLOSE_MUX, DISC, LOOP_TIMEOUT_MS, MAX_PINGS, PF, PING_PAYLOAD, POLLING_INTERVAL, SABM,
    SERIAL_READ_CHUNK, UIH,
};
use crate::error::Error;
use crate::hal::{Endpoint, SerialPort, SignalFlags};

use super::config::MuxConfig;
use super::mux::{DataSink, Mux};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    /// Orderly shutdown completed; the daemon should exit.
    Terminated,
    /// The mux must be torn down and brought up again.
    Restart,
}

/// Bounded shutdown ladder: one DISC per open channel (highest first), one
/// close-down command, then exit. Remote close-down paths skip straight to
/// the exit rung since the peer's mux mode is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Drain { channel: usize },
    CloseDown,
    Exit,
}

impl Shutdown {
    fn begin(skip_channel_disc: bool, channels: usize) -> Self {
        if skip_channel_disc {
            Shutdown::Exit
        } else if channels == 0 {
            Shutdown::CloseDown
        } else {
            Shutdown::Drain { channel: channels }
        }
    }

    fn next(self) -> Self {
        match self {
            Shutdown::Drain { channel } if channel > 1 => {
                Shutdown::Drain { channel: channel - 1 }
            }
            Shutdown::Drain { .. } => Shutdown::CloseDown,
            Shutdown::CloseDown | Shutdown::Exit => Shutdown::Exit,
        }
    }
}

/// A running mux-mode link.
pub(crate) struct Session<'a> {
    config: &'a MuxConfig,
    signals: &'a SignalFlags,
    mux: &'a mut Mux,
    serial: SerialPort,
    endpoints: Vec<Endpoint>,
    shutdown: Option<Shutdown>,
    last_frame: Instant,
    ping_number: u32,
}

impl<'a> Session<'a> {
    /// Open endpoints and serial port, run the modem preamble, and establish
    /// the control and data channels.
    ///
    /// # Errors
    /// Any open, configuration or preamble failure. The caller decides
    /// whether that is fatal (first boot) or feeds the restart loop.
    pub(crate) fn open(
        config: &'a MuxConfig,
        signals: &'a SignalFlags,
        mux: &'a mut Mux,
    ) -> Result<Self, Error> {
        info!("opening devices");
        let mut endpoints = Vec::with_capacity(config.num_channels());
        for (index, device) in config.endpoint_devices.iter().enumerate() {
            endpoints.push(Endpoint::open(device, index, config.symlink_for(index))?);
        }

        info!("opening serial port");
        let mut serial = SerialPort::open(&config.serial_device, config.baud)?;
        info!("opened serial port, switching to mux-mode");

        mux.reset();
        config.modem.run_setup(&mut serial, config)?;

        info!("waiting for mux-mode");
        thread::sleep(Duration::from_secs(1));

        info!("opening control channel");
        mux.write_frame(&mut serial, 0, &[], SABM | PF)?;
        info!("opening logical channels");
        for (index, endpoint) in endpoints.iter().enumerate() {
            thread::sleep(Duration::from_secs(1));
            let channel = index + 1;
            mux.write_frame(&mut serial, channel as u8, &[], SABM | PF)?;
            info!(
                "connecting {} to virtual channel {} on {}",
                endpoint.name(),
                channel,
                config.serial_device
            );
        }

        Ok(Self {
            config,
            signals,
            mux,
            serial,
            endpoints,
            shutdown: None,
            last_frame: Instant::now(),
            ping_number: 1,
        })
    }

    /// Run the loop until shutdown completes or a restart is needed.
    ///
    /// # Errors
    /// Hard I/O errors, unless fault-tolerant mode converts them into a
    /// restart request.
    pub(crate) fn serve(&mut self) -> Result<LoopOutcome, Error> {
        match self.serve_inner() {
            Err(e) if self.config.fault_tolerant && !self.signals.terminate() => {
                error!("mux loop failed: {e}; scheduling a restart");
                Ok(LoopOutcome::Restart)
            }
            other => other,
        }
    }

    fn serve_inner(&mut self) -> Result<LoopOutcome, Error> {
        loop {
            let (serial_ready, endpoints_ready) = self.wait_readiness()?;

            if serial_ready {
                self.pump_serial()?;
            }
            for index in 0..self.endpoints.len() {
                if endpoints_ready[index] {
                    self.pump_endpoint(index)?;
                }
            }

            if self.signals.terminate() || self.mux.terminate_requested() {
                if self.advance_shutdown() {
                    return Ok(LoopOutcome::Terminated);
                }
            } else if self.config.fault_tolerant {
                if self.mux.restart_requested() {
                    info!("trying to restart the mux");
                    return Ok(LoopOutcome::Restart);
                }
                if self.ping_number >= MAX_PINGS {
                    error!("modem is not responding, trying to restart the mux");
                    return Ok(LoopOutcome::Restart);
                }
                if self.last_frame.elapsed() >= POLLING_INTERVAL * self.ping_number {
                    debug!("sending PING to the modem");
                    self.mux.write_frame(&mut self.serial, 0, &PING_PAYLOAD, UIH)?;
                    self.ping_number += 1;
                }
            }
        }
    }

    /// One readiness wait; returns the serial flag and a per-endpoint map.
    fn wait_readiness(&mut self) -> Result<(bool, Vec<bool>), Error> {
        let idle = || (false, vec![false; self.endpoints.len()]);

        let mut fds = Vec::with_capacity(1 + self.endpoints.len());
        fds.push(PollFd::new(self.serial.as_fd(), PollFlags::POLLIN));
        for endpoint in &self.endpoints {
            fds.push(PollFd::new(endpoint.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::from(LOOP_TIMEOUT_MS)) {
            Ok(0) => return Ok(idle()),
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(idle()),
            Err(e) => return Err(Error::Io(io::Error::from(e))),
        }

        // hangups and errors count as readable so the endpoint read path can
        // observe the failure and reopen
        let ready = |fd: &PollFd<'_>| {
            fd.revents().is_some_and(|flags| {
                flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })
        };
        let serial_ready = ready(&fds[0]);
        let endpoints_ready = fds[1..].iter().map(ready).collect();
        Ok((serial_ready, endpoints_ready))
    }

    /// Serial bytes into the receive buffer, then frames through the engine.
    fn pump_serial(&mut self) -> Result<(), Error> {
        let free = self.mux.rx_free();
        if free == 0 {
            // decode pressure without taking more input
            self.mux
                .drain_frames(&mut self.serial, self.endpoints.as_mut_slice())?;
            return Ok(());
        }

        let mut chunk = [0u8; SERIAL_READ_CHUNK];
        let want = free.min(SERIAL_READ_CHUNK);
        let count = match self.serial.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                0
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if count == 0 {
            return Ok(());
        }

        self.mux.feed(&chunk[..count]);
        let extracted = self
            .mux
            .drain_frames(&mut self.serial, self.endpoints.as_mut_slice())?;
        if extracted > 0 && self.config.fault_tolerant {
            self.last_frame = Instant::now();
            self.ping_number = 1;
        }
        Ok(())
    }

    /// Endpoint bytes onto the wire, carry-over first. A read failure means
    /// the slave side went away: reopen the pty, or request terminate if
    /// even that fails.
    fn pump_endpoint(&mut self, index: usize) -> Result<(), Error> {
        let mut data = self.endpoints[index].take_staging();

        let mut chunk = [0u8; SERIAL_READ_CHUNK];
        let room = SERIAL_READ_CHUNK.saturating_sub(data.len());
        let count = if room == 0 {
            0
        } else {
            match self.endpoints[index].read(&mut chunk[..room]) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    0
                }
                Err(e) => {
                    debug!("read error on endpoint {index}: {e}; reopening");
                    if let Err(reopen_err) = self.endpoints[index].reopen() {
                        error!("can't re-open endpoint {index}: {reopen_err}");
                        self.signals.request_terminate();
                    }
                    return Ok(());
                }
            }
        };
        if count > 0 {
            debug!("data from endpoint {index}: {count} bytes");
        }

        data.extend_from_slice(&chunk[..count]);
        if data.is_empty() {
            return Ok(());
        }

        let written = self
            .mux
            .send_endpoint_data(&mut self.serial, index, &data)?;
        if written < data.len() {
            self.endpoints[index].set_staging(data.split_off(written));
        }
        Ok(())
    }

    /// One shutdown rung per loop iteration; returns true when done. Writes
    /// are best effort — a dying link must not stall the exit.
    fn advance_shutdown(&mut self) -> bool {
        let state = self.shutdown.take().unwrap_or_else(|| {
            Shutdown::begin(self.mux.skip_channel_disc(), self.endpoints.len())
        });

        match state {
            Shutdown::Drain { channel } => {
                info!("closing down the logical channel {channel}");
                if self.mux.channel(channel).opened {
                    if let Err(e) =
                        self.mux
                            .write_frame(&mut self.serial, channel as u8, &[], DISC | PF)
                    {
                        debug!("DISC for channel {channel} failed: {e}");
                    }
                }
            }
            Shutdown::CloseDown => {
                info!("sending close down request to the multiplexer");
                if let Err(e) = self.mux.write_frame(&mut self.serial, 0, &CLOSE_MUX, UIH) {
                    debug!("close-down request failed: {e}");
                }
            }
            Shutdown::Exit => return true,
        }
        self.shutdown = Some(state.next());
        false
    }
}

impl DataSink for [Endpoint] {
    fn deliver(&mut self, endpoint: usize, data: &[u8]) {
        let Some(target) = self.get_mut(endpoint) else {
            debug!("data for unknown endpoint {endpoint} dropped");
            return;
        };
        debug!("send data to virtual port {endpoint}");
        match target.write(data) {
            Ok(n) if n < data.len() => {
                debug!("endpoint {endpoint} accepted only {n} of {} bytes", data.len());
            }
            Ok(_) => {}
            Err(e) => debug!("write to endpoint {endpoint} failed: {e}"),
        }
    }
}
