use anyhow::{Context, Result};
use clap::Parser;
use confique::Config;
use crossterm::style::Stylize;
use log::{error, info, warn, LevelFilter};
use pitaya_daq::*;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{fs::File, path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "pitaya-daq")]
#[command(about = "Triggered waveform capture to rotating HDF5 files", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of events to capture, overrides the configuration
    #[arg(short = 'n', long)]
    events: Option<u64>,

    /// Directory the HDF5 files are written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Use the simulated digitizer instead of the board
    #[arg(long)]
    simulate: bool,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log debug messages (twice for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log_file {
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, log_config, file));
    }
    CombinedLogger::init(loggers).context("installing logger")?;
    Ok(())
}

fn load_conf(cli: &Cli) -> Result<Conf> {
    let mut conf = if cli.config.exists() {
        Conf::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        warn!(
            "{} not found, using built-in defaults",
            cli.config.display()
        );
        Conf::builder().env().load().context("loading defaults")?
    };
    if let Some(events) = cli.events {
        conf.run_settings.requested_events = events;
    }
    if let Some(dir) = &cli.output_dir {
        conf.run_settings.output_dir = dir.clone();
    }
    Ok(conf)
}

#[cfg(feature = "redpitaya")]
fn open_board() -> Result<Box<dyn Digitizer>, DeviceError> {
    Ok(Box::new(RedPitaya::open()?))
}

#[cfg(not(feature = "redpitaya"))]
fn open_board() -> Result<Box<dyn Digitizer>, DeviceError> {
    Err(DeviceError::new(
        "open",
        "built without the `redpitaya` feature, use --simulate",
    ))
}

fn open_simulator() -> Result<Box<dyn Digitizer>, DeviceError> {
    Ok(Box::new(SimulatedDigitizer::new(rand::random())))
}

fn run(cli: Cli) -> Result<RunSummary> {
    let conf = load_conf(&cli)?;
    let storage = &conf.run_settings.storage_path;
    let free_mb = free_space_mb(storage)
        .with_context(|| format!("querying free space on {}", storage.display()))?;

    let cancel_rx = cancel_on_termination().context("setting termination signal handler")?;

    let orchestrator = CaptureOrchestrator::new(conf, cancel_rx);
    let summary = if cli.simulate {
        info!("Using the simulated digitizer");
        orchestrator.run(free_mb, open_simulator)?
    } else {
        orchestrator.run(free_mb, open_board)?
    };
    Ok(summary)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(summary) => {
            summary.report();
            if summary.interrupted {
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{:#}", e);
            if let Some(DaqError::InsufficientStorage { .. }) = e.downcast_ref::<DaqError>() {
                eprintln!("{}", "Free up disk space and try again.".yellow());
            }
            ExitCode::FAILURE
        }
    }
}
