//! Pseudo-terminal endpoints.
//!
//! Each data channel is backed by a pty master; user programs open the slave
//! side and talk to the modem as if it were their own port. Unix98 masters
//! (`/dev/ptmx`) are allocated through the pty API so the slave can be
//! granted, unlocked and pointed to by an optional symlink; legacy BSD-style
//! device paths are opened as given.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, IntoRawFd};
use std::os::unix::fs::symlink;
use std::os::unix::fs::OpenOptionsExt;

use log::{debug, error, info};
use nix::fcntl::OFlag;
use nix::pty;
use nix::sys::termios::{self, InputFlags, LocalFlags, OutputFlags, SetArg};

use crate::error::SetupError;

/// One local pseudo-terminal bound to a data channel, plus the bytes the
/// framer could not yet take (carried over between loop iterations).
pub struct Endpoint {
    device: String,
    index: usize,
    file: File,
    slave: Option<String>,
    link: Option<String>,
    staging: Vec<u8>,
}

impl Endpoint {
    /// Open the pty for channel index `index` (zero-based) and create the
    /// slave symlink when a link path is given.
    ///
    /// # Errors
    /// Any failure opening or configuring the master device.
    pub fn open(device: &str, index: usize, link: Option<String>) -> Result<Self, SetupError> {
        let (file, slave) = open_master(device).map_err(|source| SetupError::OpenEndpoint {
            device: device.to_owned(),
            source,
        })?;

        let mut endpoint = Self {
            device: device.to_owned(),
            index,
            file,
            slave,
            link,
            staging: Vec::new(),
        };
        endpoint.refresh_symlink();
        Ok(endpoint)
    }

    /// Tear the master down and allocate a fresh one, recreating the symlink
    /// (a new Unix98 master gets a new slave name). Pending carry-over is
    /// discarded with the dead descriptor.
    ///
    /// # Errors
    /// Any failure opening the replacement master.
    pub fn reopen(&mut self) -> Result<(), SetupError> {
        let (file, slave) =
            open_master(&self.device).map_err(|source| SetupError::OpenEndpoint {
                device: self.device.clone(),
                source,
            })?;
        self.file = file;
        self.slave = slave;
        self.staging.clear();
        self.refresh_symlink();
        info!("endpoint {} reopened on {}", self.index, self.name());
        Ok(())
    }

    /// Slave device name when known, otherwise the configured path.
    #[must_use]
    pub fn name(&self) -> &str {
        self.slave.as_deref().unwrap_or(&self.device)
    }

    /// Endpoint index (zero-based; DLC is `index + 1`).
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Take the carried-over bytes, leaving the staging area empty.
    #[must_use]
    pub fn take_staging(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.staging)
    }

    /// Store bytes that could not be framed this iteration.
    pub fn set_staging(&mut self, bytes: Vec<u8>) {
        self.staging = bytes;
    }

    fn refresh_symlink(&mut self) {
        let Some(link) = self.link.clone() else { return };
        let Some(slave) = self.slave.clone() else {
            debug!("no slave name for {}, symlink {link} not created", self.device);
            return;
        };
        let _ = fs::remove_file(&link);
        if let Err(e) = symlink(&slave, &link) {
            error!("can't create symbolic link {link} -> {slave}: {e}");
        }
    }
}

impl Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsFd for Endpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            let _ = fs::remove_file(link);
        }
    }
}

/// Allocate the master side, returning it with the slave name when the
/// device is a Unix98 multiplexor.
fn open_master(device: &str) -> io::Result<(File, Option<String>)> {
    if device == "/dev/ptmx" {
        let master = pty::posix_openpt(OFlag::O_RDWR | OFlag::O_NONBLOCK)?;
        // without these, programs cannot open the slave side
        pty::grantpt(&master)?;
        pty::unlockpt(&master)?;
        let slave = pty::ptsname_r(&master)?;
        // SAFETY: into_raw_fd transfers ownership of the descriptor to File
        let file = unsafe { File::from_raw_fd(master.into_raw_fd()) };
        configure_master(&file)?;
        Ok((file, Some(slave)))
    } else {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(device)?;
        configure_master(&file)?;
        Ok((file, None))
    }
}

/// Raw mode on the master: no echo, no CR/LF translation in either
/// direction, so AT dialogs and PPP pass through unmangled.
fn configure_master(file: &File) -> io::Result<()> {
    let mut tio = termios::tcgetattr(file)?;
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
    termios::tcsetattr(file, SetArg::TCSANOW, &tio)?;
    Ok(())
}
