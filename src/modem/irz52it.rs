//! iRZ 52iT preamble.
//!
//! Sets the speed first (the 52iT boots at 115200), combines the DSR and
//! flow-control options into one command, and feeds the PIN unquoted.

use log::debug;

use crate::driver::config::MuxConfig;
use crate::error::SetupError;
use crate::hal::ModemPort;

use super::{at_command, probe, send_pin, ModemProfile, AT_COMMAND_STEP};

/// iRZ 52iT profile.
pub struct Irz52it;

impl ModemProfile for Irz52it {
    fn name(&self) -> &'static str {
        "irz52it"
    }

    fn setup<P: ModemPort>(
        &self,
        port: &mut P,
        config: &MuxConfig,
    ) -> Result<(), SetupError> {
        let speed_command = if config.baud != 0 {
            format!("AT+IPR={}\r\n", config.baud)
        } else {
            "AT+IPR=115200\r\n".to_owned()
        };
        if !at_command(port, &speed_command, AT_COMMAND_STEP) {
            debug!("{} was not confirmed", speed_command.trim_end());
        }
        at_command(port, "AT\r\n", AT_COMMAND_STEP);
        at_command(port, "AT&S0\\Q3\r\n", AT_COMMAND_STEP);

        probe(port, config);
        send_pin(port, config, false);

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
    fn preamble_sets_speed_before_probing() {
        let mut port = ScriptedPort::new();
        let config = MuxConfig::new(["/dev/ptmx"]);
        Irz52it.setup(&mut port, &config).unwrap();
        assert_eq!(
            port.at_commands(),
            vec![
                "AT+IPR=115200\r\n",
                "AT\r\n",
                "AT&S0\\Q3\r\n",
                "AT\r\n",
                "AT+CMUX=0\r\n",
            ]
        );
    }

    #[test]
    fn pin_is_unquoted() {
        let mut port = ScriptedPort::new();
        let mut config = MuxConfig::new(["/dev/ptmx"]);
        config.pin_code = Some(4321);
        Irz52it.setup(&mut port, &config).unwrap();
        assert!(port.at_commands().contains(&"AT+CPIN=4321\r\n".to_owned()));
    }

    #[test]
    fn cmux_refusal_is_fatal() {
        let mut port = ScriptedPort::new().fail_on("AT+CMUX");
        let config = MuxConfig::new(["/dev/ptmx"]);
        assert!(matches!(
            Irz52it.setup(&mut port, &config),
            Err(SetupError::MuxRejected)
        ));
    }
}
