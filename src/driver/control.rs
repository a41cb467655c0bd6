//! Control-channel (DLC 0) message handling.
//!
//! A control message rides in a UI/UIH information field as
//! `TYPE | LEN [| LEN_EXT] | VALUE...`. The type byte carries its own EA stop
//! bit and a C/R bit separating commands from responses. Every supported
//! command is acknowledged by echoing the payload with C/R cleared; anything
//! unrecognized is answered with a non-supported-command response instead.

use std::io::{self, Write};

use log::{debug, error, info};

use crate::constants::{CR, C_CLD, C_MSC, C_NSC, C_TEST, EA, S_DV, S_FC, S_IC, S_RTC, UIH};
use crate::frame::Frame;

use super::mux::Mux;

/// React to one control message received on DLC 0.
///
/// # Errors
/// Propagates hard I/O errors raised while sending the acknowledgement or
/// the non-supported-command response.
pub(super) fn handle_message<L: Write>(
    mux: &mut Mux,
    frame: &Frame,
    link: &mut L,
) -> io::Result<()> {
    let data = &frame.data;
    if data.is_empty() {
        return Ok(());
    }

    // only single-byte types are interpreted; skip any extension bytes
    let type_byte = data[0];
    let mut i = 0;
    while i < data.len() && data[i] & EA == 0 {
        i += 1;
    }
    i += 1;
    let type_len = i;

    if type_byte & CR == 0 {
        // a response to one of our commands
        if type_byte & !CR == C_NSC {
            error!("the mobile station didn't support the command sent");
        } else {
            debug!("command acknowledged by the mobile station");
        }
        return Ok(());
    }

    // value length, EA-terminated base-128
    let mut length = 0usize;
    while i < data.len() {
        length = length * 128 + ((data[i] & 254) >> 1) as usize;
        if data[i] & EA == EA {
            break;
        }
        i += 1;
    }
    i += 1;

    let mut supported = true;
    match type_byte & !CR {
        C_CLD => {
            info!("the mobile station requested mux-mode termination");
            mux.set_fault_response();
        }
        C_TEST => {
            debug!("test command with {} value bytes", data.len().saturating_sub(i));
        }
        C_MSC => {
            if i + 1 < data.len() {
                let channel = ((data[i] & 252) >> 2) as usize;
                let signals = data[i + 1];
                debug!("modem status command on channel {channel}");
                if signals & S_FC == S_FC {
                    debug!("no frames allowed");
                } else {
                    debug!("frames allowed");
                }
                if signals & S_RTC == S_RTC {
                    debug!("RTC");
                }
                if signals & S_IC == S_IC {
                    debug!("ring");
                }
                if signals & S_DV == S_DV {
                    debug!("DV");
                }
                // recorded only; mapping onto the local endpoint's modem
                // lines would need ioctl plumbing the daemon doesn't do
                mux.record_signals(channel, signals);
            } else {
                error!(
                    "modem status command, but no info. i: {i}, len: {length}, data-len: {}",
                    data.len()
                );
            }
        }
        other => {
            error!("unknown command ({other:#04x}) from the control channel");
            let mut response = Vec::with_capacity(2 + type_len);
            response.push(C_NSC);
            response.push(EA | ((type_len as u8 & 127) << 1));
            response.extend_from_slice(&data[..type_len]);
            mux.write_frame(link, 0, &response, UIH)?;
            supported = false;
        }
    }

    if supported {
        // acknowledge by echoing the payload with C/R cleared
        let mut ack = data.clone();
        ack[0] &= !CR;
        mux.write_frame(link, 0, &ack, UIH)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::S_RTR;
    use crate::frame::write_frame;
    use crate::test_utils::{decode_all, open_channel, RecordingSink};

    fn send_control(mux: &mut Mux, payload: &[u8]) -> Vec<Frame> {
        let mut encoded = Vec::new();
        write_frame(&mut encoded, 0, payload, UIH, 512).unwrap();
        mux.feed(&encoded);
        let mut out = Vec::new();
        let mut sink = RecordingSink::default();
        mux.drain_frames(&mut out, &mut sink).unwrap();
        decode_all(&out)
    }

    #[test]
    fn unknown_command_gets_nsc_and_no_ack() {
        let mut mux = Mux::new(1, 31, false);
        open_channel(&mut mux, 0);
        let sent = send_control(&mut mux, &[0x43, 0x01]);
        // the version probe went out at open time, so only the NSC is here
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, 0);
        assert_eq!(sent[0].control, UIH);
        assert_eq!(sent[0].data, vec![C_NSC, 0x03, 0x43]);
    }

    #[test]
    fn test_command_is_echoed_with_cr_cleared() {
        let mut mux = Mux::new(1, 31, false);
        let payload = [C_TEST | CR, 0x07, b'a', b'b', b'c'];
        let sent = send_control(&mut mux, &payload);
        assert_eq!(sent.len(), 1);
        let mut expected = payload.to_vec();
        expected[0] &= !CR;
        assert_eq!(sent[0].data, expected);
    }

    #[test]
    fn modem_status_is_recorded_and_acked() {
        let mut mux = Mux::new(4, 31, false);
        open_channel(&mut mux, 3);
        let signals = S_DV | S_RTC | S_FC | EA;
        let sent = send_control(&mut mux, &[C_MSC | CR, 0x05, 0x0C | EA, signals]);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data[0], C_MSC);
        assert!(mux.channel(3).opened, "status must not close the channel");
        assert_eq!(mux.channel(3).v24_signals, signals);
    }

    #[test]
    fn modem_status_for_unknown_channel_is_tolerated() {
        let mut mux = Mux::new(1, 31, false);
        let sent = send_control(&mut mux, &[C_MSC | CR, 0x05, (40 << 2) | EA, S_DV]);
        // still acknowledged, nothing recorded
        assert_eq!(sent.len(), 1);
        assert_eq!(mux.channel(1).v24_signals, S_DV | S_RTR | S_RTC | EA);
    }

    #[test]
    fn truncated_modem_status_is_acked_but_ignored() {
        let mut mux = Mux::new(1, 31, false);
        let sent = send_control(&mut mux, &[C_MSC | CR, 0x03, 0x05]);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data[0], C_MSC);
    }

    #[test]
    fn close_down_terminates_or_restarts() {
        let mut mux = Mux::new(1, 31, false);
        let sent = send_control(&mut mux, &[C_CLD | CR, EA]);
        assert!(mux.terminate_requested());
        assert!(mux.skip_channel_disc());
        assert_eq!(sent.len(), 1, "close-down is still acknowledged");

        let mut mux = Mux::new(1, 31, true);
        send_control(&mut mux, &[C_CLD | CR, EA]);
        assert!(mux.restart_requested());
        assert!(!mux.terminate_requested());
    }

    #[test]
    fn nsc_response_is_not_answered() {
        let mut mux = Mux::new(1, 31, false);
        let sent = send_control(&mut mux, &[C_NSC, 0x03, 0x43]);
        assert!(sent.is_empty());
    }

    #[test]
    fn plain_ack_is_noted_silently() {
        let mut mux = Mux::new(1, 31, false);
        let sent = send_control(&mut mux, &[C_MSC & !CR, 0x05, 0x0D, 0x8D]);
        assert!(sent.is_empty());
    }

    #[test]
    fn empty_control_payload_is_ignored() {
        let mut mux = Mux::new(1, 31, false);
        let mut encoded = Vec::new();
        write_frame(&mut encoded, 0, &[], UIH, 31).unwrap();
        mux.feed(&encoded);
        let mut out = Vec::new();
        let mut sink = RecordingSink::default();
        assert_eq!(mux.drain_frames(&mut out, &mut sink).unwrap(), 1);
        assert!(out.is_empty());
    }
}
