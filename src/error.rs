//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate. Using the
//! `thiserror` crate, it gives the acquisition loop, the storage sinks and the configuration
//! layer one consistent error to propagate with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML parse errors or type mismatches
//!   in environment overrides.
//! - **`Configuration`**: Semantic errors in otherwise well-formed configuration (zero buffer
//!   capacity, thresholds in the wrong order).
//! - **`Allocation`**: The ring buffer could not reserve its backing storage. This is fatal for
//!   the instrument; the caller shows the fault indication and halts.
//! - **`EmptyBuffer`** / **`NoSamplesInWindow`**: A snapshot found nothing to capture. These are
//!   reported to the operator but never stop acquisition.
//! - **`Io`** / **`Storage`**: Persistence sink failures. Snapshots degrade gracefully when these
//!   occur, see [`crate::snapshot`].
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Failed to allocate ring buffer for {capacity} records ({bytes} bytes)")]
    Allocation { capacity: usize, bytes: usize },

    #[error("Buffer is empty, nothing to capture")]
    EmptyBuffer,

    #[error("No samples in window [{start_us}, {end_us}] us")]
    NoSamplesInWindow { start_us: u64, end_us: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sample source error: {0}")]
    SampleSource(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether acquisition can keep running after this error.
    ///
    /// Only a failed buffer allocation stops the instrument; everything else is reported on the
    /// live channel and the loop carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaqError::Allocation { .. })
    }
}
