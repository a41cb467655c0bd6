//! Generic preamble for modems that only need `AT+CMUX`.
//!
//! When a baud rate is configured it is passed as the speed *index* in the
//! third CMUX parameter rather than via `AT+IPR`.

use crate::constants::baud_index;
use crate::driver::config::MuxConfig;
use crate::error::SetupError;
use crate::hal::ModemPort;

use super::{at_command, probe, send_pin, ModemProfile, AT_COMMAND_STEP};

/// Default profile: probe, optional PIN, `AT+CMUX`.
pub struct Generic;

impl ModemProfile for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn setup<P: ModemPort>(
        &self,
        port: &mut P,
        config: &MuxConfig,
    ) -> Result<(), SetupError> {
        let mux_command = match baud_index(config.baud) {
            Some(index) if index > 0 => format!("AT+CMUX=0,0,{index}\r\n"),
            _ => "AT+CMUX=0\r\n".to_owned(),
        };

        probe(port, config);
        send_pin(port, config, false);

        if !at_command(port, &mux_command, AT_COMMAND_STEP) {
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
    fn minimal_preamble() {
        let mut port = ScriptedPort::new();
        let config = MuxConfig::new(["/dev/ptmx"]);
        Generic.setup(&mut port, &config).unwrap();
        assert_eq!(port.at_commands(), vec!["AT\r\n", "AT+CMUX=0\r\n"]);
    }

    #[test]
    fn baud_is_passed_as_cmux_speed_index() {
        let mut port = ScriptedPort::new();
        let config = MuxConfig::new(["/dev/ptmx"]).with_baud(115200);
        Generic.setup(&mut port, &config).unwrap();
        assert_eq!(port.at_commands().last().map(String::as_str), Some("AT+CMUX=0,0,5\r\n"));
    }

    #[test]
    fn cmux_refusal_is_fatal() {
        let mut port = ScriptedPort::new().fail_on("AT+CMUX");
        let config = MuxConfig::new(["/dev/ptmx"]);
        assert!(matches!(
            Generic.setup(&mut port, &config),
            Err(SetupError::MuxRejected)
        ));
    }
}
