//! GSM 07.10 (3GPP TS 27.010) basic-mode multiplexer daemon.
//!
//! One physical serial link to a GSM modem is multiplexed into several
//! independent virtual serial endpoints: user programs open local
//! pseudo-terminal slaves and see each data-link channel (DLC) as its own
//! modem port — dialup on one, SMS on another, status polling on a third.
//!
//! # Architecture
//!
//! The crate is organized in three layers:
//!
//! 1. **Wire layer** ([`frame`], [`buffer`]): basic-mode frame encoding with
//!    the reverse-CRC-8 FCS, and a ring buffer that recovers frame
//!    boundaries from a noisy byte stream.
//! 2. **Core layer** ([`driver`]): the per-channel link state machine driven
//!    by SABM/UA/DM/DISC/UI/UIH, the DLC 0 control-message protocol, the
//!    readiness-multiplexed fan-in/out loop, and the supervisor with its
//!    fault-tolerance policy (liveness pings, automatic re-init).
//! 3. **Adapter layer** ([`hal`], [`modem`]): raw serial and pseudo-terminal
//!    plumbing, signal flags, daemon backgrounding, and the per-modem-family
//!    AT preambles behind a single `setup` seam.
//!
//! The daemon itself is the `gsmmuxd` binary; the library surface exists so
//! the engine can be embedded and tested without hardware.
//!
//! # Concurrency model
//!
//! Strictly single-threaded and readiness-driven. Signal handlers only set
//! atomic flags; every frame decode, state transition and endpoint transfer
//! happens on the supervisory loop's thread.

#![warn(missing_docs)]
#![warn(clippy::suspicious, clippy::style, clippy::complexity, clippy::perf)]

pub mod buffer;
pub mod constants;
pub mod driver;
pub mod error;
pub mod frame;
pub mod hal;
pub mod modem;

#[cfg(test)]
mod test_utils;

pub use buffer::RxBuffer;
pub use driver::config::MuxConfig;
pub use driver::mux::{ChannelState, DataSink, Mux};
pub use driver::supervisor::Supervisor;
pub use error::{ConfigError, Error, Result, SetupError};
pub use frame::{Frame, FrameKind};
pub use hal::{Endpoint, ModemPort, SerialPort, SignalFlags};
pub use modem::{ModemProfile, ModemType};
