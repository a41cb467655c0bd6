//! Siemens MC35 family preamble.
//!
//! The MC35/MC35i wants its port speed pinned with `AT+IPR` and DSR/flow
//! options set before `AT+CMUX`, and the SIM PIN must be quoted.

use log::debug;

use crate::driver::config::MuxConfig;
use crate::error::SetupError;
use crate::hal::ModemPort;

use super::{at_command, probe, send_pin, ModemProfile, AT_COMMAND_STEP};

/// Siemens MC35/MC35i (and MC75) profile.
pub struct Mc35;

impl ModemProfile for Mc35 {
    fn name(&self) -> &'static str {
        "mc35"
    }

    fn setup<P: ModemPort>(
        &self,
        port: &mut P,
        config: &MuxConfig,
    ) -> Result<(), SetupError> {
        probe(port, config);

        let speed_command = if config.baud != 0 {
            format!("AT+IPR={}\r\n", config.baud)
        } else {
            "AT+IPR=57600\r\n".to_owned()
        };
        if !at_command(port, &speed_command, AT_COMMAND_STEP) {
            debug!("{} was not confirmed", speed_command.trim_end());
        }
        if !at_command(port, "AT\r\n", AT_COMMAND_STEP) {
            debug!("AT after speed change was not confirmed");
        }
        // DSR always on, then software flow control
        if !at_command(port, "AT&S0\r\n", AT_COMMAND_STEP) {
            debug!("AT&S0 was not confirmed");
        }
        if !at_command(port, "AT\\Q3\r\n", AT_COMMAND_STEP) {
            debug!("AT\\Q3 was not confirmed");
        }

        send_pin(port, config, true);

        if !at_command(port, "AT+CMUX=0\r\n", AT_COMMAND_STEP) {
            return Err(SetupError::MuxRejected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedPort;

    #[test]
    fn full_preamble_in_order() {
        let mut port = ScriptedPort::new();
        let config = MuxConfig::new(["/dev/ptmx"]);
        Mc35.setup(&mut port, &config).expect("setup should succeed");
        assert_eq!(
            port.at_commands(),
            vec![
                "AT\r\n",
                "AT+IPR=57600\r\n",
                "AT\r\n",
                "AT&S0\r\n",
                "AT\\Q3\r\n",
                "AT+CMUX=0\r\n",
            ]
        );
    }

    #[test]
    fn explicit_baud_and_quoted_pin() {
        let mut port = ScriptedPort::new();
        let mut config = MuxConfig::new(["/dev/ptmx"]).with_baud(115200);
        config.pin_code = Some(1234);
        Mc35.setup(&mut port, &config).unwrap();
        let commands = port.at_commands();
        assert!(commands.contains(&"AT+IPR=115200\r\n".to_owned()));
        assert!(commands.contains(&"AT+CPIN=\"1234\"\r\n".to_owned()));
    }

    #[test]
    fn cmux_refusal_is_fatal() {
        let mut port = ScriptedPort::new().fail_on("AT+CMUX");
        let config = MuxConfig::new(["/dev/ptmx"]);
        assert!(matches!(
            Mc35.setup(&mut port, &config),
            Err(SetupError::MuxRejected)
        ));
    }

    #[test]
    fn unresponsive_modem_gets_a_close_down_frame() {
        let mut port = ScriptedPort::new().silent_on("AT\r\n");
        let config = MuxConfig::new(["/dev/ptmx"]);
        // the probe fails, a close-down frame goes out, and the preamble
        // still runs through to AT+CMUX
        Mc35.setup(&mut port, &config).unwrap();
        assert!(port.wrote_frame_bytes(), "expected an in-mux close-down");
    }
}
