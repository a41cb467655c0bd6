//! Daemon configuration.

use crate::constants::{baud_index, DEFAULT_FRAME_SIZE, MAX_CHANNELS, MAX_FRAME_SIZE_LIMIT};
use crate::error::ConfigError;
use crate::modem::ModemType;

/// Everything the supervisor needs to bring the multiplexer up.
///
/// Populated from the command line by the `gsmmuxd` binary; the `with_*`
/// builders exist mainly for tests and embedding.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Serial port the modem is attached to.
    pub serial_device: String,
    /// Local pseudo-terminal device paths, one per data channel.
    pub endpoint_devices: Vec<String>,
    /// Information-field ceiling for outgoing frames.
    pub max_frame_size: usize,
    /// Modem family selecting the AT preamble.
    pub modem: ModemType,
    /// Mux-mode baud rate; 0 leaves the port speed untouched.
    pub baud: u32,
    /// SIM PIN fed to the modem during the preamble.
    pub pin_code: Option<u32>,
    /// Prefix for slave-device symlinks (`<prefix>0`, `<prefix>1`, ...).
    pub symlink_prefix: Option<String>,
    /// Ping the modem and restart the mux when it goes silent.
    pub fault_tolerant: bool,
    /// Foreground mode with verbose logging.
    pub debug: bool,
    /// Parent blocks until the daemon reports startup success.
    pub wait_for_startup: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            serial_device: "/dev/modem".to_owned(),
            endpoint_devices: Vec::new(),
            max_frame_size: DEFAULT_FRAME_SIZE,
            modem: ModemType::Generic,
            baud: 0,
            pin_code: None,
            symlink_prefix: None,
            fault_tolerant: false,
            debug: false,
            wait_for_startup: false,
        }
    }
}

impl MuxConfig {
    /// Configuration with defaults and the given endpoint devices.
    #[must_use]
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoint_devices: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the serial device.
    #[must_use]
    pub fn with_serial_device(mut self, device: impl Into<String>) -> Self {
        self.serial_device = device.into();
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the modem family.
    #[must_use]
    pub fn with_modem(mut self, modem: ModemType) -> Self {
        self.modem = modem;
        self
    }

    /// Set the mux-mode baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Enable fault-tolerant mode.
    #[must_use]
    pub fn with_fault_tolerance(mut self, enabled: bool) -> Self {
        self.fault_tolerant = enabled;
        self
    }

    /// Number of data channels (DLC 1..=n).
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.endpoint_devices.len()
    }

    /// Symlink path for endpoint `index`, when a prefix is configured.
    #[must_use]
    pub fn symlink_for(&self, index: usize) -> Option<String> {
        self.symlink_prefix.as_ref().map(|prefix| format!("{prefix}{index}"))
    }

    /// Check the configuration against protocol and daemon limits.
    ///
    /// # Errors
    /// Returns the first violated limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_devices.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if self.endpoint_devices.len() > MAX_CHANNELS {
            return Err(ConfigError::TooManyEndpoints(self.endpoint_devices.len()));
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            return Err(ConfigError::InvalidFrameSize(self.max_frame_size));
        }
        if baud_index(self.baud).is_none() {
            return Err(ConfigError::InvalidBaudRate(self.baud));
        }
        if let Some(pin) = self.pin_code {
            if pin == 0 || pin > 9999 {
                return Err(ConfigError::InvalidPinCode(pin));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_with_one_endpoint() {
        let config = MuxConfig::new(["/dev/ptmx"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.serial_device, "/dev/modem");
        assert_eq!(config.max_frame_size, DEFAULT_FRAME_SIZE);
        assert_eq!(config.num_channels(), 1);
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        let config = MuxConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::NoEndpoints));
    }

    #[test]
    fn rejects_too_many_endpoints() {
        let devices = vec!["/dev/ptmx".to_owned(); MAX_CHANNELS + 1];
        let config = MuxConfig::new(devices);
        assert!(matches!(config.validate(), Err(ConfigError::TooManyEndpoints(_))));
    }

    #[test]
    fn rejects_bad_frame_size_and_baud() {
        let config = MuxConfig::new(["/dev/ptmx"]).with_max_frame_size(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidFrameSize(0)));
        let config = MuxConfig::new(["/dev/ptmx"]).with_baud(1200);
        assert_eq!(config.validate(), Err(ConfigError::InvalidBaudRate(1200)));
    }

    #[test]
    fn rejects_out_of_range_pin() {
        let mut config = MuxConfig::new(["/dev/ptmx"]);
        config.pin_code = Some(10_000);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPinCode(10_000)));
        config.pin_code = Some(1234);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn symlink_naming() {
        let mut config = MuxConfig::new(["/dev/ptmx", "/dev/ptmx"]);
        assert_eq!(config.symlink_for(0), None);
        config.symlink_prefix = Some("/dev/mux".to_owned());
        assert_eq!(config.symlink_for(1).as_deref(), Some("/dev/mux1"));
    }
}
