//! # Weather Station Application Entry Point
//!
//! Runs the monitoring pipeline on a Raspberry Pi (or on a laptop with the
//! simulated sensor and console LEDs), and offers a few read-only views of
//! the reading log.
//!
//! ## Usage
//! ```text
//! weather-station [--config station-config.toml] [run [--in-process]]
//! weather-station latest | history [--limit N] | stats
//! weather-station init-config [--force]
//! ```
//!
//! While running with the stdin button, every empty line logs a reading and
//! `status`, `reset`, `history [N]` and `stats` are answered on stdout.
//!
//! Logs go to stderr; set `RUST_LOG` to change the filter.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weather_station_lib::config::{Config, EdgeKind, SamplerConfig, SourceKind, DEFAULT_CONFIG_PATH};
use weather_station_lib::indicator::Patterns;
use weather_station_lib::isolation::{run_isolated_indicator, ProcessSpec};
use weather_station_lib::observation::{ConsoleCommands, StationObserver};
use weather_station_lib::output::open_output;
use weather_station_lib::persistence::{JsonlStore, RecordStore};
use weather_station_lib::shared_state::SharedState;
use weather_station_lib::source::{IioSource, ReadingSource, SimulatedSource};
use weather_station_lib::supervisor::{
    shutdown_signal, Components, IndicatorLaunch, OutputOpener, ShutdownOutcome, Supervisor,
};
use weather_station_lib::trigger::{EdgeSource, StdinEdgeSource};

/// Grace period for runtime tasks still parked on stdin at exit.
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "weather-station", version, about = "Temperature/humidity monitor with LED alerts")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the station (default)
    Run {
        /// Keep the indicator in this process even if the config isolates it
        #[arg(long)]
        in_process: bool,
    },
    /// Indicator child: reads state notifications on stdin
    #[command(hide = true)]
    Indicator,
    /// Print the most recently logged reading
    Latest,
    /// Print the last logged readings, oldest first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print aggregates over the reading log
    Stats,
    /// Write a config file with every default spelled out
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_station=info,weather_station_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let load = || Config::load_from_path(&cli.config);

    match cli.command.unwrap_or(Command::Run { in_process: false }) {
        Command::Run { in_process } => run_station(&cli.config, load(), in_process),
        Command::Indicator => run_indicator(&load()),
        Command::Latest => {
            let store = open_store(&load())?;
            match store.latest()? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no readings logged yet"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::History { limit } => {
            let store = open_store(&load())?;
            println!("{}", serde_json::to_string_pretty(&store.recent(limit)?)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            let store = open_store(&load())?;
            match store.statistics()? {
                Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                None => println!("not enough data"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::InitConfig { force } => init_config(&cli.config, force),
    }
}

fn run_station(config_path: &Path, config: Config, in_process: bool) -> anyhow::Result<ExitCode> {
    let state = SharedState::new(config.thresholds);
    let store = Arc::new(open_store(&config)?);
    let observer = StationObserver::new(state.clone(), store.clone());

    let hardware = config.hardware.clone();
    let opener: OutputOpener = Arc::new(move || open_output(&hardware));

    let indicator = if in_process || !config.indicator.isolated {
        IndicatorLaunch::InProcess
    } else {
        IndicatorLaunch::Process(ProcessSpec::current_exe(config_path).context("locating own executable")?)
    };

    let components = Components {
        state,
        source: build_source(&config.sampler),
        sink: store,
        edges: build_edges(&config, observer),
        open_output: opener,
        indicator,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let supervisor = Supervisor::start(&config, components)?;
        anyhow::Ok(supervisor.run_until(shutdown_signal()).await)
    })?;
    rt.shutdown_timeout(RUNTIME_SHUTDOWN);

    match report.outcome {
        ShutdownOutcome::Cooperative => {}
        ShutdownOutcome::Forced => tracing::warn!("Indicator had to be forced down"),
        ShutdownOutcome::Crashed => tracing::error!("Indicator failed during the run"),
    }
    Ok(if report.leds_off && report.outcome != ShutdownOutcome::Crashed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_indicator(config: &Config) -> anyhow::Result<ExitCode> {
    let output = open_output(&config.hardware).context("opening indicator LEDs")?;
    let patterns = Patterns::from_config(&config.indicator);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run_isolated_indicator(output, patterns));
    // The stdin reader may still be parked on a blocking read
    rt.shutdown_timeout(RUNTIME_SHUTDOWN);

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!(error = %e, "Indicator stopped without a terminate message");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_source(sampler: &SamplerConfig) -> Box<dyn ReadingSource> {
    match sampler.source {
        SourceKind::Simulated => {
            let [t_low, t_high] = sampler.simulated_temperature;
            let [h_low, h_high] = sampler.simulated_humidity;
            Box::new(SimulatedSource::new(t_low..t_high, h_low..h_high))
        }
        SourceKind::Iio => Box::new(IioSource::new(&sampler.iio_device)),
    }
}

fn build_edges(config: &Config, observer: StationObserver) -> Option<Box<dyn EdgeSource>> {
    match config.trigger.source {
        EdgeKind::None => None,
        EdgeKind::Stdin => {
            let console = ConsoleCommands::new(observer);
            Some(Box::new(StdinEdgeSource::with_commands(Box::new(
                move |line: &str| console.handle(line),
            ))))
        }
        #[cfg(all(target_os = "linux", feature = "hardware"))]
        EdgeKind::Gpio => Some(Box::new(weather_station_lib::gpio::GpioButton::new(
            config.hardware.button_pin,
        ))),
        #[cfg(not(all(target_os = "linux", feature = "hardware")))]
        EdgeKind::Gpio => {
            tracing::error!("GPIO button needs a build with --features hardware; running without it");
            None
        }
    }
}

fn open_store(config: &Config) -> anyhow::Result<JsonlStore> {
    let path = &config.persistence.path;
    JsonlStore::open(path).with_context(|| format!("opening reading log {}", path.display()))
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<ExitCode> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}
