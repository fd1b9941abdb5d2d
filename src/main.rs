//! tensched Command Line Interface
//!
//! Usage:
//!   tensched [OPTIONS] <input-file>
//!   tensched --help
//!
//! Examples:
//!   tensched add.json                              # Print the module
//!   tensched --script cache.json add.json          # Apply a schedule script
//!   tensched --script s.json --emit=json -o out.json add.json
//!   tensched --device=gpu --detailed-errors --script s.json add.json

use clap::{Parser, ValueEnum};
use tensched::config::ScheduleConfig;
use tensched::ir::DeviceApi;
use tensched::schedule::ErrorMessageLevel;
use std::path::PathBuf;
use std::fs;
use anyhow::{Result, Context};
use log::{info, debug};

/// tensched - schedule primitives for tensor programs
#[derive(Parser, Debug)]
#[command(name = "tensched")]
#[command(version)]
#[command(about = "Apply cache, buffer and barrier primitives to a tensor program", long_about = None)]
struct Cli {
    /// Input module (JSON)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Schedule script to apply (JSON)
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Device stamped on synthesized loops and buffers
    #[arg(short, long, default_value = "host")]
    device: DeviceArg,

    /// Print the offending subtree with schedule errors
    #[arg(long)]
    detailed_errors: bool,

    /// Abort on the first violation without diagnostics
    #[arg(long)]
    strict: bool,

    /// What to emit
    #[arg(long, default_value = "ir")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceArg {
    /// CPU host
    Host,
    /// GPU device
    Gpu,
}

impl From<DeviceArg> for DeviceApi {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Host => DeviceApi::Host,
            DeviceArg::Gpu => DeviceApi::Gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Textual IR
    Ir,
    /// Module JSON
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("tensched v{}", tensched::VERSION);
    debug!("Input file: {:?}", cli.input);

    let mut module = tensched::load_module(&cli.input)
        .with_context(|| format!("Failed to load module: {:?}", cli.input))?;

    if let Some(ref path) = cli.script {
        let script = tensched::load_script(path)
            .with_context(|| format!("Failed to load schedule script: {:?}", path))?;
        let config = build_config(&cli);
        debug!("Schedule config: {:?}", config);
        info!("Applying {} steps...", script.steps.len());
        module = tensched::script::apply_script(module, &config, &script)?;
    }

    let output = match cli.emit {
        EmitKind::Ir => module.dump(),
        EmitKind::Json => module.to_json().context("Failed to serialize module")?,
    };
    write_output(&cli.output, &output)
}

fn build_config(cli: &Cli) -> ScheduleConfig {
    let level = if cli.detailed_errors {
        ErrorMessageLevel::Detailed
    } else {
        ErrorMessageLevel::General
    };
    ScheduleConfig::new()
        .with_device(cli.device.into())
        .with_error_level(level)
        .with_strict(cli.strict)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
