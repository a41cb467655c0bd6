//! Serial port access.
//!
//! Opens the modem link raw (8N1, no echo, no translation) the way a terminal
//! program would, and optionally performs the speed-to-zero-and-back wake-up
//! dance some modems (Siemens MC35i among them) need before they answer AT
//! commands.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::Duration;

use log::debug;
use nix::fcntl::{self, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, Termios,
};

use crate::error::SetupError;

// =============================================================================
// Port abstraction
// =============================================================================

/// What the modem layer needs from a port: byte I/O plus the few termios-ish
/// operations the AT dialog depends on. [`SerialPort`] is the real thing;
/// tests substitute scripted doubles.
pub trait ModemPort: Read + Write {
    /// Block until queued output has reached the device.
    fn drain(&mut self) -> io::Result<()>;

    /// Wait up to `timeout` for the device to become readable.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Settle time between sending a command and polling for the reply.
    fn settle_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
}

// =============================================================================
// Serial port
// =============================================================================

/// An open, raw-configured serial port.
pub struct SerialPort {
    file: File,
    device: String,
}

impl SerialPort {
    /// Open and configure the port.
    ///
    /// With `baud == 0` the port speed is left alone and only the raw-mode
    /// flags are applied; otherwise the wake-up sequence switches the rate to
    /// zero and back up to the requested speed.
    ///
    /// # Errors
    /// Any open or termios failure, wrapped with the device path.
    pub fn open(device: &str, baud: u32) -> Result<Self, SetupError> {
        let wrap = |source: io::Error| SetupError::OpenSerial {
            device: device.to_owned(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(device)
            .map_err(wrap)?;

        let port = Self { file, device: device.to_owned() };
        debug!("serial port {device} opened");

        // opened non-blocking so a dead carrier can't hang us; from here on
        // reads are gated by readiness polling, so switch to blocking I/O
        fcntl::fcntl(port.file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
            .map_err(|e| wrap(io::Error::from(e)))?;

        match baud_to_rate(baud) {
            Some(rate) => port.configure_with_wakeup(rate).map_err(wrap)?,
            None => port.configure_raw().map_err(wrap)?,
        }
        Ok(port)
    }

    /// The device path this port was opened from.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Apply raw 8N1 settings without touching the configured speed.
    fn configure_raw(&self) -> io::Result<()> {
        let mut tio = termios::tcgetattr(&self.file)?;
        tio.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
        tio.control_flags.remove(ControlFlags::PARENB | ControlFlags::CSTOPB);
        tio.control_flags.remove(ControlFlags::CSIZE);
        tio.control_flags.insert(ControlFlags::CS8);
        raw_mode(&mut tio);
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &tio)?;
        Ok(())
    }

    /// Minicom-style option setting: configure 8N1 at the requested rate,
    /// drop the rate to zero for a second, then bring it back up. Needed to
    /// wake some modems after a power cycle.
    fn configure_with_wakeup(&self, rate: BaudRate) -> io::Result<()> {
        let mut tio = termios::tcgetattr(&self.file)?;
        tio.input_flags = InputFlags::IGNBRK;
        tio.control_flags = ControlFlags::CLOCAL
            | ControlFlags::CREAD
            | ControlFlags::CS8
            | ControlFlags::HUPCL;
        raw_mode(&mut tio);

        termios::cfsetspeed(&mut tio, rate)?;
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &tio)?;

        let mut zeroed = tio.clone();
        termios::cfsetspeed(&mut zeroed, BaudRate::B0)?;
        termios::tcsetattr(&self.file, SetArg::TCSANOW, &zeroed)?;

        thread::sleep(Duration::from_secs(1));

        termios::tcsetattr(&self.file, SetArg::TCSANOW, &tio)?;
        Ok(())
    }
}

/// Disable all input/output translation, echo and signal generation.
fn raw_mode(tio: &mut Termios) {
    tio.local_flags.remove(
        LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG,
    );
    tio.input_flags
        .remove(InputFlags::INLCR | InputFlags::ICRNL | InputFlags::IGNCR);
    tio.output_flags.remove(
        OutputFlags::OPOST
            | OutputFlags::OLCUC
            | OutputFlags::ONLRET
            | OutputFlags::ONOCR
            | OutputFlags::OCRNL,
    );
}

/// Map a validated `-b` value onto a termios rate. 0 means "don't touch".
fn baud_to_rate(baud: u32) -> Option<BaudRate> {
    match baud {
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115200 => Some(BaudRate::B115200),
        230400 => Some(BaudRate::B230400),
        460800 => Some(BaudRate::B460800),
        _ => None,
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for SerialPort {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl ModemPort for SerialPort {
    fn drain(&mut self) -> io::Result<()> {
        termios::tcdrain(&self.file)?;
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let millis = u16::try_from(timeout.as_millis().max(1)).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) => Ok(n > 0),
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}
