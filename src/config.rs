//! Configuration using Figment.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults matching the instrument firmware ([`Settings::default`])
//! 2. `config/sees.toml`
//! 3. Environment variables prefixed with `SEES_DAQ_`, with `__` between nesting levels
//!
//! # Example
//! ```no_run
//! use sees_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // SEES_DAQ_DETECTOR__REFRACTORY_US=500 overrides detector.refractory_us
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Sampling at {} Hz", settings.acquisition.sample_rate_hz);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::acquisition::{OperatingMode, StorageMode};
use crate::detector::{AdcCalibration, DetectorThresholds};
use crate::error::{AppResult, DaqError};
use crate::logging::OutputFormat;
use crate::validation;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/sees.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SEES_DAQ_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sampling and buffering
    pub acquisition: AcquisitionConfig,
    /// Pulse detector thresholds
    pub detector: DetectorThresholds,
    /// Snapshot window and output
    pub snapshot: SnapshotConfig,
    /// Status LED timing
    pub status: StatusConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "SEEs Particle Detector".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Sampling, buffering and simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// ADC sample rate.
    pub sample_rate_hz: u32,
    /// Rolling history kept in full and compact modes.
    pub buffer_seconds: u32,
    /// Hit-only mode capacity.
    pub max_hits: usize,
    /// Record layout held in the ring buffer.
    pub storage_mode: StorageMode,
    /// Body-cam (always recording) or session (on/off) operation.
    pub operating_mode: OperatingMode,
    /// ADC resolution and reference.
    pub adc: AdcCalibration,
    /// Mean pulse rate of the simulated detector.
    pub mock_pulse_rate_hz: f64,
    /// Seed for the simulated detector; random when absent.
    pub mock_seed: Option<u64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10_000,
            buffer_seconds: 10,
            max_hits: 10_000,
            storage_mode: StorageMode::Full,
            operating_mode: OperatingMode::BodyCam,
            adc: AdcCalibration::default(),
            mock_pulse_rate_hz: 20.0,
            mock_seed: None,
        }
    }
}

/// Snapshot window and output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Half-width of the extracted window.
    pub window_seconds: f64,
    /// Sampling continues this long after a trigger before extraction.
    pub post_trigger_seconds: f64,
    /// Directory snapshot files are written to.
    pub output_dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            window_seconds: 2.5,
            post_trigger_seconds: 2.5,
            output_dir: PathBuf::from("snaps"),
        }
    }
}

impl SnapshotConfig {
    /// Half-width in microseconds.
    pub fn window_us(&self) -> u64 {
        seconds_to_us(self.window_seconds)
    }

    /// Post-trigger wait in microseconds.
    pub fn post_trigger_us(&self) -> u64 {
        seconds_to_us(self.post_trigger_seconds)
    }
}

/// Status LED settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Toggle period while recording.
    pub blink_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { blink_ms: 500 }
    }
}

fn seconds_to_us(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1e6).round() as u64
    } else {
        0
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        tracing::debug!(path = %path.as_ref().display(), "Configuration loaded");
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |field: &str, reason: &str| {
            DaqError::Configuration(format!("{}: {}", field, reason))
        };

        validation::is_valid_log_level(&self.application.log_level)
            .map_err(|e| invalid("application.log_level", e))?;

        let acq = &self.acquisition;
        validation::is_in_range(acq.sample_rate_hz, 1..=1_000_000)
            .map_err(|e| invalid("acquisition.sample_rate_hz", e))?;
        validation::is_in_range(acq.buffer_seconds, 1..=3_600)
            .map_err(|e| invalid("acquisition.buffer_seconds", e))?;
        validation::is_in_range(acq.max_hits, 1..=usize::MAX)
            .map_err(|e| invalid("acquisition.max_hits", e))?;
        validation::is_in_range(acq.adc.bits, 1..=16)
            .map_err(|e| invalid("acquisition.adc.bits", e))?;
        validation::is_in_range(acq.adc.vref, 0.1..=5.0)
            .map_err(|e| invalid("acquisition.adc.vref", e))?;
        if !acq.mock_pulse_rate_hz.is_finite() || acq.mock_pulse_rate_hz < 0.0 {
            return Err(invalid(
                "acquisition.mock_pulse_rate_hz",
                "Rate must be a non-negative number",
            ));
        }

        self.detector.validate()?;

        let snap = &self.snapshot;
        validation::is_positive_seconds(snap.window_seconds)
            .map_err(|e| invalid("snapshot.window_seconds", e))?;
        validation::is_in_range(snap.post_trigger_seconds, 0.0..=f64::from(acq.buffer_seconds))
            .map_err(|e| invalid("snapshot.post_trigger_seconds", e))?;
        if acq.storage_mode != StorageMode::Hits
            && snap.window_seconds + snap.post_trigger_seconds > f64::from(acq.buffer_seconds)
        {
            return Err(invalid(
                "snapshot",
                "window_seconds + post_trigger_seconds exceeds acquisition.buffer_seconds",
            ));
        }
        validation::is_valid_path(&snap.output_dir.to_string_lossy())
            .map_err(|e| invalid("snapshot.output_dir", e))?;

        validation::is_in_range(self.status.blink_ms, 1..=60_000)
            .map_err(|e| invalid("status.blink_ms", e))?;

        Ok(())
    }
}
