//! `gsmmuxd` — GSM 07.10 multiplexer daemon.
//!
//! Splits one modem serial port into several virtual ports:
//!
//! ```text
//! gsmmuxd -p /dev/ttyS0 -m mc35 -s /dev/mux /dev/ptmx /dev/ptmx /dev/ptmx
//! ```

use std::process;

use clap::Parser;
use log::{error, info, LevelFilter};

use gsm0710_muxd::constants::DEFAULT_FRAME_SIZE;
use gsm0710_muxd::error::{ConfigError, Error};
use gsm0710_muxd::hal::daemon;
use gsm0710_muxd::{ModemType, MuxConfig, SignalFlags, Supervisor};

/// GSM 07.10 multiplexer: connects virtual serial ports to one GSM modem.
#[derive(Debug, Parser)]
#[command(name = "gsmmuxd", version, about)]
struct Args {
    /// Serial port device to connect to
    #[arg(short = 'p', value_name = "DEVICE", default_value = "/dev/modem")]
    serial_port: String,

    /// Maximum frame size
    #[arg(short = 'f', value_name = "SIZE", default_value_t = DEFAULT_FRAME_SIZE)]
    frame_size: usize,

    /// Debug mode: don't fork, log verbosely to stderr
    #[arg(short = 'd')]
    debug: bool,

    /// Modem type (mc35, mc75, irz52it, generic)
    #[arg(short = 'm', value_name = "MODEM", default_value = "generic")]
    modem: String,

    /// MUX mode baudrate (0, 9600, 19200, ...); 0 keeps the port speed
    #[arg(short = 'b', value_name = "BAUD", default_value_t = 0)]
    baudrate: u32,

    /// PIN code to feed to the modem
    #[arg(short = 'P', value_name = "PIN")]
    pin_code: Option<u32>,

    /// Prefix for symlinks to the slave devices (e.g. /dev/mux)
    #[arg(short = 's', value_name = "PREFIX")]
    symlink_prefix: Option<String>,

    /// Wait for daemon startup success/failure before the parent exits
    #[arg(short = 'w')]
    wait: bool,

    /// Restart automatically if the modem stops responding
    #[arg(short = 'r')]
    fault_tolerant: bool,

    /// Pseudo-terminal devices (e.g. /dev/ptmx), one per channel
    #[arg(value_name = "PTY", required = true)]
    ptys: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<MuxConfig, ConfigError> {
        let modem = ModemType::from_name(&self.modem)
            .ok_or_else(|| ConfigError::UnknownModem(self.modem.clone()))?;
        let config = MuxConfig {
            serial_device: self.serial_port,
            endpoint_devices: self.ptys,
            max_frame_size: self.frame_size,
            modem,
            baud: self.baudrate,
            pin_code: self.pin_code,
            symlink_prefix: self.symlink_prefix,
            fault_tolerant: self.fault_tolerant,
            debug: self.debug,
            wait_for_startup: self.wait,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gsmmuxd: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        error!("{e}");
        eprintln!("gsmmuxd: {e}");
        process::exit(1);
    }
}

fn run(config: MuxConfig) -> Result<(), Error> {
    // the parent process never returns from daemonize
    let parent = if config.debug {
        None
    } else {
        Some(daemon::daemonize(config.wait_for_startup)?)
    };

    let level = if config.debug { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let signals = SignalFlags::install().map_err(Error::Io)?;

    for (index, device) in config.endpoint_devices.iter().enumerate() {
        info!("port {index}: {device}");
    }

    let startup_parent = if config.wait_for_startup { parent } else { None };
    Supervisor::new(config, signals)
        .with_startup_notification(startup_parent)
        .run()?;

    info!("gsmmuxd finished");
    Ok(())
}
