//! Platform adapters: serial port, pseudo-terminals, signals, backgrounding.
//!
//! Everything Unix-specific lives here behind small seams so the mux core
//! stays free of file descriptors and testable with in-memory doubles.

pub mod daemon;
pub mod pty;
pub mod serial;
pub mod signals;

pub use pty::Endpoint;
pub use serial::{ModemPort, SerialPort};
pub use signals::SignalFlags;
