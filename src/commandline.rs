use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::PathBuf;
use std::time::Duration;
use sunspec_rtu_lib::frame;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

/// Parses a slave address, accepting decimal or hex (0x01) notation.
fn parse_slave_address(value: &str) -> Result<u8, String> {
    let address = clap_num::maybe_hex::<u8>(value)?;
    if !(frame::SLAVE_MIN..=frame::SLAVE_MAX).contains(&address) {
        return Err(format!(
            "slave address must be between {} and {}",
            frame::SLAVE_MIN,
            frame::SLAVE_MAX
        ));
    }
    Ok(address)
}

/// Parses a register address or value, accepting decimal or hex notation.
fn parse_register(value: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(value)
}

/// Parses a point value, accepting decimal or hex notation.
fn parse_point_value(value: &str) -> Result<u64, String> {
    clap_num::maybe_hex::<u64>(value)
}

#[derive(Subcommand, Debug)]
pub enum CliCommands {
    /// Scan the device for the SunSpec marker and list the model chain.
    Scan,

    /// Read one model and print its decoded points.
    Read {
        /// SunSpec model id (e.g. 802).
        model: u16,

        /// Print raw register values only, without scale factors applied.
        #[arg(long)]
        raw: bool,
    },

    /// Read every model the registry knows.
    ReadAll {
        /// Print raw register values only, without scale factors applied.
        #[arg(long)]
        raw: bool,
    },

    /// Read raw holding registers.
    ReadRegisters {
        /// First register address (e.g. 40000 or 0x9C40).
        #[arg(value_parser = parse_register)]
        address: u16,

        /// Number of registers to read (1-125).
        count: u16,
    },

    /// Write a new value to one writable model point.
    ///
    /// The value is the raw register value; scale factors are not applied.
    /// Example: to limit power output to 95.00% when WMaxLimPct_SF is -2:
    ///   sunspoll write-point 802 WMaxLimPct 9500
    #[command(verbatim_doc_comment)]
    WritePoint {
        /// SunSpec model id (e.g. 802).
        model: u16,

        /// Point name as listed by the read command (e.g. WMaxLimPct).
        point: String,

        /// Raw value to write, decimal or hex.
        #[arg(value_parser = parse_point_value)]
        value: u64,
    },

    /// Write one raw holding register.
    WriteRegister {
        /// Register address (e.g. 40005 or 0x9C45).
        #[arg(value_parser = parse_register)]
        address: u16,

        /// Value to write, decimal or hex.
        #[arg(value_parser = parse_register)]
        value: u16,
    },

    /// Poll one model continuously and print it.
    Daemon {
        /// SunSpec model id to poll.
        #[arg(default_value_t = 802)]
        model: u16,

        /// Poll interval (e.g. 5s, 1m).
        #[arg(short, long, default_value = "5s", value_parser = humantime::parse_duration)]
        poll_interval: Duration,

        /// Print raw register values only, without scale factors applied.
        #[arg(long)]
        raw: bool,
    },
}

const fn about_text() -> &'static str {
    "SunSpec solar inverter tool: discover models over Modbus RTU, read their points and write setpoints"
}

#[derive(Parser, Debug)]
#[command(author, version, about = about_text(), propagate_version = true)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommands,

    /// Serial device the inverter is attached to (e.g. /dev/ttyUSB0 or COM1).
    #[arg(global = true, short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Baud rate of the serial link.
    #[arg(global = true, short, long, default_value_t = 9600)]
    pub baud_rate: u32,

    /// Modbus RTU slave address of the inverter (e.g. 1 or 0x01).
    #[arg(global = true, short, long, default_value = "1", value_parser = parse_slave_address)]
    pub address: u8,

    /// Model descriptor file (JSON); the built-in inverter-control models
    /// are used when omitted.
    #[arg(global = true, short, long)]
    pub models: Option<PathBuf>,

    /// Response timeout per attempt (e.g. 1s, 500ms).
    #[arg(global = true, long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Attempts per Modbus transaction; 1 disables retries.
    #[arg(global = true, long, default_value_t = 3)]
    pub retries: u32,

    /// Minimum delay between Modbus transactions (e.g. 50ms).
    ///
    /// The Modbus specification requires a silent interval of at least 3.5
    /// character times between frames. Smaller values are raised to that
    /// bound.
    #[arg(global = true, long, default_value = "50ms", value_parser = humantime::parse_duration)]
    pub delay: Duration,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}
