//! Error types for the mux daemon.
//!
//! Errors are organized by domain:
//! - [`ConfigError`]: command-line / configuration validation failures
//! - [`SetupError`]: device bring-up and modem initialization failures
//!
//! The unified [`Error`] enum wraps the domain errors plus plain I/O errors
//! raised while the multiplexer is running. Protocol violations on the wire
//! (bad FCS, framing garbage) are *not* errors — they are counted and
//! resynchronized by the receive buffer and never propagate.

use std::fmt;
use std::io;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration validation errors.
///
/// These are detected before any device is touched and are always fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No pseudo-terminal device was given on the command line.
    NoEndpoints,
    /// More endpoint devices than the channel table supports.
    TooManyEndpoints(usize),
    /// `-f` outside the accepted range.
    InvalidFrameSize(usize),
    /// `-b` is not one of the supported rates.
    InvalidBaudRate(u32),
    /// `-P` outside 1..=9999.
    InvalidPinCode(u32),
    /// `-m` named a modem family this build does not know.
    UnknownModem(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoEndpoints => write!(f, "no pseudo-terminal devices given"),
            ConfigError::TooManyEndpoints(n) => {
                write!(f, "{n} endpoints requested, at most {} supported", crate::constants::MAX_CHANNELS)
            }
            ConfigError::InvalidFrameSize(n) => write!(f, "invalid frame size {n}"),
            ConfigError::InvalidBaudRate(b) => write!(f, "unsupported baud rate {b}"),
            ConfigError::InvalidPinCode(p) => write!(f, "PIN code {p} outside 1..=9999"),
            ConfigError::UnknownModem(name) => write!(f, "unknown modem type \"{name}\""),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// Setup Errors
// =============================================================================

/// Device bring-up and modem initialization errors.
///
/// Fatal at first boot; in fault-tolerant mode a later occurrence feeds the
/// restart loop instead.
#[derive(Debug)]
pub enum SetupError {
    /// A local pseudo-terminal could not be opened.
    OpenEndpoint { device: String, source: io::Error },
    /// The serial port could not be opened or configured.
    OpenSerial { device: String, source: io::Error },
    /// The modem refused `AT+CMUX`.
    MuxRejected,
    /// Forking into the background failed.
    Daemonize(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::OpenEndpoint { device, source } => {
                write!(f, "can't open {device}: {source}")
            }
            SetupError::OpenSerial { device, source } => {
                write!(f, "can't open serial port {device}: {source}")
            }
            SetupError::MuxRejected => write!(f, "MUX mode doesn't function"),
            SetupError::Daemonize(e) => write!(f, "daemonize failed: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::OpenEndpoint { source, .. } | SetupError::OpenSerial { source, .. } => {
                Some(source)
            }
            SetupError::Daemonize(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Unified Error Type
// =============================================================================

/// Top-level error for daemon operations.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(ConfigError),
    /// Bring-up error.
    Setup(SetupError),
    /// Runtime I/O error on the serial link or an endpoint.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config: {e}"),
            Error::Setup(e) => write!(f, "setup: {e}"),
            Error::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Setup(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        Error::Setup(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(io::Error::from(e))
    }
}

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;
