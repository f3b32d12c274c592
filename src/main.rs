//! CLI entry point for sees_daq.
//!
//! Runs the acquisition loop on the host against a simulated SiPM or a replayed recording. Commands
//! (`on`, `off`, `snap`) are read from stdin, the live stream goes to stdout and diagnostics go to
//! stderr, so the binary behaves like the instrument's serial port.
//!
//! # Usage
//!
//! Simulate for 30 seconds with a snapshot typed on stdin:
//! ```bash
//! sees_daq run --seconds 30
//! ```
//!
//! Replay a recorded stream in hit-only mode:
//! ```bash
//! sees_daq run --replay capture.csv --mode hits --quiet
//! ```
//!
//! Summarize a snapshot file:
//! ```bash
//! sees_daq inspect snaps/snap_00000_0002500000.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufWriter, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use sees_daq::acquisition::{Acquisition, OperatingMode, StorageMode, WriterChannel};
use sees_daq::config::Settings;
use sees_daq::data::storage::{self, CsvSnapshotWriter, SnapshotSink, UnavailableSink};
use sees_daq::hardware::{MockLed, MockSipm, ReplaySource, SampleSource};
use sees_daq::logging::{self, OutputFormat, TracingConfig};
use sees_daq::status::{StatusLed, SystemStatus};

#[derive(Parser)]
#[command(name = "sees_daq")]
#[command(about = "Body-cam acquisition for the SEEs particle detector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition loop
    Run {
        /// Configuration file (defaults to config/sees.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replay a recorded `time_ms,voltage_V,hit,total_hits` stream instead of simulating
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,

        /// Record layout held in the buffer
        #[arg(long, value_enum)]
        mode: Option<StorageMode>,

        /// Wait for `on` before recording instead of recording from start
        #[arg(long)]
        session: bool,

        /// Directory snapshots are written to
        #[arg(long)]
        output: Option<PathBuf>,

        /// Do not write snapshot files
        #[arg(long)]
        no_storage: bool,

        /// Stream status lines and snapshots only, not every sample
        #[arg(long)]
        quiet: bool,

        /// Diagnostic output format (overrides application.log_format)
        #[arg(long, value_enum)]
        log_format: Option<OutputFormat>,

        /// Log span open and close events
        #[arg(long)]
        log_spans: bool,

        /// Disable ANSI colors in diagnostics
        #[arg(long)]
        no_color: bool,
    },

    /// Summarize a snapshot CSV file
    Inspect {
        /// Snapshot file
        file: PathBuf,
    },
}

type HostAcquisition = Acquisition<
    Box<dyn SampleSource>,
    Box<dyn SnapshotSink>,
    WriterChannel<BufWriter<Stdout>>,
    MockLed,
>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            replay,
            seconds,
            mode,
            session,
            output,
            no_storage,
            quiet,
            log_format,
            log_spans,
            no_color,
        } => {
            let mut settings = match &config {
                Some(path) => Settings::load_from(path),
                None => Settings::load(),
            }
            .context("Failed to load configuration")?;
            if let Some(mode) = mode {
                settings.acquisition.storage_mode = mode;
            }
            if session {
                settings.acquisition.operating_mode = OperatingMode::Session;
            }
            if let Some(output) = output {
                settings.snapshot.output_dir = output;
            }
            settings.validate().context("Invalid configuration")?;
            logging::init(tracing_config(
                &settings, log_format, log_spans, no_color,
            )?)?;

            let options = RunOptions {
                replay,
                seconds,
                no_storage,
                quiet,
            };
            run(settings, options).await
        }
        Commands::Inspect { file } => inspect(file),
    }
}

/// Tracing setup from the loaded settings with command-line overrides applied.
fn tracing_config(
    settings: &Settings,
    log_format: Option<OutputFormat>,
    log_spans: bool,
    no_color: bool,
) -> Result<TracingConfig> {
    let mut config = TracingConfig::from_settings(settings)?
        .with_span_events(log_spans)
        .with_ansi(!no_color);
    if let Some(format) = log_format {
        config = config.with_format(format);
    }
    Ok(config)
}

struct RunOptions {
    replay: Option<PathBuf>,
    seconds: Option<f64>,
    no_storage: bool,
    quiet: bool,
}

async fn run(settings: Settings, options: RunOptions) -> Result<()> {
    let clock = Instant::now();
    let now_us = move || u64::try_from(clock.elapsed().as_micros()).unwrap_or(u64::MAX);

    let acq_settings = &settings.acquisition;
    let source: Box<dyn SampleSource> = match &options.replay {
        Some(path) => Box::new(ReplaySource::from_path(path, acq_settings.adc)?),
        None => Box::new(MockSipm::new(
            acq_settings.adc,
            acq_settings.sample_rate_hz,
            acq_settings.mock_pulse_rate_hz,
            acq_settings.mock_seed,
        )),
    };
    let sink: Box<dyn SnapshotSink> = if options.no_storage {
        Box::new(UnavailableSink)
    } else {
        Box::new(CsvSnapshotWriter::new(&settings.snapshot.output_dir))
    };
    let live = WriterChannel::new(BufWriter::new(std::io::stdout()));

    let mut acquisition: HostAcquisition =
        match Acquisition::new(&settings, source, sink, live, MockLed::default(), now_us()) {
            Ok(acquisition) => acquisition,
            Err(e) if e.is_fatal() => {
                println!("[SEEs] ERROR: Failed to allocate buffer!");
                println!("[SEEs] System cannot continue - halting");
                error!(error = %e, "Fatal error, halting until interrupted");
                halt_with_fault(clock).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
    acquisition.set_stream_samples(!options.quiet);
    acquisition.start(now_us());

    let stop_at = options
        .seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .and_then(|d| clock.checked_add(d));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => acquisition.handle_line(&line, now_us()),
                Ok(None) => {
                    info!("Command input closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read command input");
                    stdin_open = false;
                }
            },
            _ = ticker.tick() => {
                acquisition.service(now_us());
                if acquisition.has_pending_snapshot() {
                    continue;
                }
                if acquisition.source().is_exhausted() {
                    info!("Replay finished");
                    break;
                }
                if stop_at.is_some_and(|t| Instant::now() >= t) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let stats = acquisition.stats();
    info!(
        samples = stats.samples,
        hits = stats.hits,
        snapshots = stats.snapshots,
        dropped = stats.dropped,
        "Run complete"
    );
    acquisition.shutdown();
    Ok(())
}

/// Blink the fault pattern until Ctrl-C. There is nothing else the instrument can do.
async fn halt_with_fault(clock: Instant) {
    let mut led = MockLed::default();
    let mut status = StatusLed::new(Duration::from_millis(500));
    let elapsed_ms = || u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    status.set_status(SystemStatus::Fault, elapsed_ms(), &mut led);

    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            _ = ticker.tick() => status.update(elapsed_ms(), &mut led),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn inspect(file: PathBuf) -> Result<()> {
    let summary = storage::read_snapshot_summary(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    println!("File:    {}", file.display());
    println!("Columns: {}", summary.columns.join(","));
    println!("Rows:    {}", summary.rows);
    if let Some(hits) = summary.hits {
        println!("Hits:    {}", hits);
    }
    if let Some((first, last)) = summary.timestamp_range_us {
        println!(
            "Span:    {} .. {} us ({:.3} s)",
            first,
            last,
            last.saturating_sub(first) as f64 / 1e6
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "sees_daq",
            "run",
            "--log-format",
            "json",
            "--log-spans",
            "--no-color",
        ])
        .unwrap();
        let Commands::Run {
            log_format,
            log_spans,
            no_color,
            ..
        } = cli.command
        else {
            panic!("expected the run command");
        };
        assert_eq!(log_format, Some(OutputFormat::Json));

        let config =
            tracing_config(&Settings::default(), log_format, log_spans, no_color).unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_log_format_defaults_to_settings() {
        let cli = Cli::try_parse_from(["sees_daq", "run"]).unwrap();
        let Commands::Run {
            log_format,
            log_spans,
            no_color,
            ..
        } = cli.command
        else {
            panic!("expected the run command");
        };

        let mut settings = Settings::default();
        settings.application.log_format = OutputFormat::Pretty;
        let config = tracing_config(&settings, log_format, log_spans, no_color).unwrap();
        assert_eq!(config.format, OutputFormat::Pretty);
        assert!(!config.with_span_events);
        assert!(config.with_ansi);
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["sees_daq", "run", "--log-format", "xml"]).is_err());
    }
}
