//! SunSpec RTU inverter CLI
//!
//! A command-line application for talking to SunSpec-compliant solar inverters
//! over Modbus RTU (serial).
//!
//! This tool allows users to:
//! - Scan a device for the SunSpec marker and walk its model chain.
//! - Read a whole model and print every point, scaled or raw.
//! - Read arbitrary holding registers for low-level debugging.
//! - Write a named control point (for example a power curtailment setpoint).
//! - Write a single raw register.
//! - Run in a continuous daemon mode polling one model.
//!
//! The CLI leverages the `sunspec_rtu_lib` crate for framing, model
//! descriptors and client operations.

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{panic, time::Duration};
use sunspec_rtu_lib::{
    client::RtuClient,
    discovery,
    model::{DecodeOptions, DecodedModel, ModelRegistry},
    serial::SerialTransport,
};

mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Lower bound for the inter-frame silence regardless of baud rate.
const PRACTICAL_MIN_INTER_FRAME_DELAY: Duration = Duration::from_micros(1_750);

/// Calculates the minimum recommended delay for Modbus RTU based on baud rate.
/// This is typically 3.5 character times.
fn minimum_rtu_delay(baud_rate: u32) -> Duration {
    // 1 start bit + 8 data bits + 1 parity/stop bit + 1 stop bit = 11 bits,
    // the common Modbus assumption for character time.
    let bits_per_char = 11.0;
    if baud_rate == 0 {
        // Avoid division by zero, default to a safe delay
        return Duration::from_millis(16);
    }

    let char_time_secs = bits_per_char / f64::from(baud_rate);
    let inter_frame_delay_secs = 3.5 * char_time_secs;
    let delay = Duration::from_micros((inter_frame_delay_secs * 1_000_000.0) as u64);

    delay.max(PRACTICAL_MIN_INTER_FRAME_DELAY)
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: u32) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

/// Loads the model registry, either the built-in descriptors or a user-supplied file.
fn load_registry(args: &commandline::CliArgs) -> Result<ModelRegistry> {
    match &args.models {
        Some(path) => ModelRegistry::load_file(path)
            .with_context(|| format!("Cannot load model descriptors from {}", path.display())),
        None => Ok(ModelRegistry::builtin()),
    }
}

/// Creates and connects a new client based on the provided command-line arguments.
fn create_client(args: &commandline::CliArgs) -> Result<RtuClient> {
    let transport = SerialTransport::new(&args.device, args.baud_rate);
    let mut client = RtuClient::new(Box::new(transport), args.address)?;
    client.set_timeout(args.timeout);
    client.set_retries(args.retries);
    client
        .connect()
        .with_context(|| format!("Cannot open serial device {}", args.device))?;
    debug!("Connected: {}", client.connection_info());
    Ok(client)
}

/// Runs SunSpec discovery so later model reads use the addresses the device
/// actually reports. Failures are not fatal; the nominal addresses still work
/// on most inverters.
fn try_discovery(client: &mut RtuClient, registry: &mut ModelRegistry) {
    match discovery::discover(client, registry) {
        Ok(report) => {
            if !report.complete {
                warn!("Model walk stopped early; using the instances found so far");
            }
        }
        Err(err) => {
            warn!("{err}; falling back to nominal model addresses");
        }
    }
}

/// Prompts the user before a write hits the device.
fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

/// Prints one decoded model as a point table.
fn print_model(registry: &ModelRegistry, decoded: &DecodedModel) {
    let name = registry
        .model(decoded.model_id)
        .map(|m| m.name.as_str())
        .unwrap_or("unknown model");
    println!("Model {} - {}", decoded.model_id, name);
    for point in &decoded.points {
        let value = point
            .value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:>12} {:>14}  {:<6} {:<6} {}",
            point.name,
            point.raw.to_string(),
            value,
            point.units.as_deref().unwrap_or(""),
            point.access.to_string(),
            point.label.as_deref().unwrap_or("")
        );
    }
}

/// Prints raw registers eight per row, with decimal and hex addresses.
fn print_registers(address: u16, words: &[u16]) {
    for (row, chunk) in words.chunks(8).enumerate() {
        let at = u32::from(address) + row as u32 * 8;
        let cells: Vec<String> = chunk.iter().map(|w| format!("{w:04X}")).collect();
        println!("{at:>5} (0x{at:04X}): {}", cells.join(" "));
    }
}

/// Handles the scan command: discover the marker and list the model chain.
fn run_scan(client: &mut RtuClient, registry: &mut ModelRegistry) -> Result<()> {
    let report =
        discovery::discover(client, registry).with_context(|| "SunSpec discovery failed")?;
    println!("SunSpec marker found at register {}", report.base_address);
    if report.models.is_empty() {
        println!("No models reported after the marker.");
    }
    for model in &report.models {
        let name = registry
            .model(model.model_id)
            .map(|m| m.name.as_str())
            .unwrap_or("unknown model");
        println!(
            "  model {:>5} at register {:>5}, {:>3} registers: {}",
            model.model_id, model.address, model.length, name
        );
    }
    if !report.complete {
        println!("Walk stopped before the end marker; the list may be incomplete.");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "SunSpec RTU CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Load model descriptors and validate the inter-frame delay
    let mut registry = load_registry(&args)?;
    let delay = check_rtu_delay(args.delay, args.baud_rate);

    // 3. Connect
    let mut client = create_client(&args)?;

    // 4. Execute the command
    match &args.command {
        commandline::CliCommands::Scan => {
            info!("Executing: SunSpec scan");
            run_scan(&mut client, &mut registry)?;
        }
        commandline::CliCommands::Read { model, raw } => {
            info!("Executing: Read model {model}");
            try_discovery(&mut client, &mut registry);
            let options = DecodeOptions { apply_scale: !raw };
            let decoded = client
                .read_model(&registry, *model, options)
                .with_context(|| format!("Cannot read model {model}"))?;
            print_model(&registry, &decoded);
        }
        commandline::CliCommands::ReadAll { raw } => {
            info!("Executing: Read all known models");
            try_discovery(&mut client, &mut registry);
            let options = DecodeOptions { apply_scale: !raw };
            let ids: Vec<u16> = registry.models().map(|m| m.id).collect();
            let mut first = true;
            for id in ids {
                if !first {
                    std::thread::sleep(delay);
                    println!();
                }
                first = false;
                match client.read_model(&registry, id, options) {
                    Ok(decoded) => print_model(&registry, &decoded),
                    Err(err) => warn!("Cannot read model {id}: {err}"),
                }
            }
        }
        commandline::CliCommands::ReadRegisters { address, count } => {
            info!("Executing: Read {count} registers at {address}");
            let words = client
                .read_holding_registers(*address, *count)
                .with_context(|| format!("Cannot read {count} registers at {address}"))?;
            print_registers(*address, &words);
        }
        commandline::CliCommands::WritePoint {
            model,
            point,
            value,
        } => {
            info!("Executing: Write point {point} of model {model}");
            try_discovery(&mut client, &mut registry);
            let address = registry.field_address(*model, point)?;
            if !confirm(&format!(
                "Write {value} to point {point} of model {model} (register {address})?"
            ))? {
                bail!("Write aborted");
            }
            client
                .write_point(&registry, *model, point, *value)
                .with_context(|| format!("Cannot write point {point} of model {model}"))?;
            println!("Point {point} of model {model} set to {value} successfully.");
        }
        commandline::CliCommands::WriteRegister { address, value } => {
            info!("Executing: Write register {address}");
            if !confirm(&format!("Write {value} to register {address}?"))? {
                bail!("Write aborted");
            }
            client
                .write_register(*address, *value)
                .with_context(|| format!("Cannot write register {address}"))?;
            println!("Register {address} set to {value} successfully.");
        }
        commandline::CliCommands::Daemon {
            model,
            poll_interval,
            raw,
        } => {
            info!("Starting daemon mode: model={model}, interval={poll_interval:?}");
            try_discovery(&mut client, &mut registry);
            let options = DecodeOptions { apply_scale: !raw };
            loop {
                match client.read_model(&registry, *model, options) {
                    Ok(decoded) => {
                        print_model(&registry, &decoded);
                        println!();
                    }
                    Err(err) => warn!("Poll failed: {err}"),
                }
                std::thread::sleep(delay.max(*poll_interval));
            }
        }
    }

    Ok(())
}
