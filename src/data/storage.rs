//! Snapshot persistence sinks.
//!
//! A sink receives one finished snapshot at a time and writes it somewhere durable. On the
//! instrument that is the SD card; on a host it is a directory. Sinks are best-effort: the
//! [`crate::snapshot`] coordinator keeps going when a sink is missing or fails.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, DaqError};

/// Metadata written at the top of every snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMetadata {
    /// Zero-based snapshot counter for this session.
    pub snap_index: u32,
    /// Trigger instant in microseconds.
    pub trigger_time_us: u64,
    /// Half-width of the extraction window in seconds.
    pub window_seconds: f64,
    /// Number of data rows.
    pub samples: usize,
    /// Storage layout the rows came from (`full`, `hits` or `compact`).
    pub record_kind: String,
    /// Wall-clock time the file was written.
    pub captured_at: DateTime<Utc>,
}

/// Destination for finished snapshots.
pub trait SnapshotSink {
    /// Whether the sink can currently accept data.
    fn is_available(&self) -> bool;

    /// Write one snapshot as `file_name` and return where it went.
    fn write_snapshot(
        &mut self,
        file_name: &str,
        metadata: &SnapshotMetadata,
        header: &[&str],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> AppResult<PathBuf>;
}

impl<K: SnapshotSink + ?Sized> SnapshotSink for Box<K> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn write_snapshot(
        &mut self,
        file_name: &str,
        metadata: &SnapshotMetadata,
        header: &[&str],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> AppResult<PathBuf> {
        (**self).write_snapshot(file_name, metadata, header, rows)
    }
}

/// A sink that is never available, standing in for a missing SD card.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSink;

impl SnapshotSink for UnavailableSink {
    fn is_available(&self) -> bool {
        false
    }

    fn write_snapshot(
        &mut self,
        file_name: &str,
        _metadata: &SnapshotMetadata,
        _header: &[&str],
        _rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> AppResult<PathBuf> {
        Err(DaqError::Storage(format!(
            "No storage available for '{}'",
            file_name
        )))
    }
}

/// Writes each snapshot to its own CSV file in an output directory.
pub struct CsvSnapshotWriter {
    output_dir: PathBuf,
    available: bool,
}

impl CsvSnapshotWriter {
    /// Prepare `output_dir`, creating it if needed.
    ///
    /// A directory that cannot be created leaves the writer unavailable rather than failing, so
    /// acquisition can start without storage.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let available = match std::fs::create_dir_all(&output_dir) {
            Ok(()) => {
                tracing::info!(dir = %output_dir.display(), "Snapshot writer initialized");
                true
            }
            Err(e) => {
                tracing::warn!(
                    dir = %output_dir.display(),
                    error = %e,
                    "Failed to create snapshot directory, snapshots will not be saved"
                );
                false
            }
        };
        Self {
            output_dir,
            available,
        }
    }

    /// Directory snapshots are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl SnapshotSink for CsvSnapshotWriter {
    fn is_available(&self) -> bool {
        self.available
    }

    fn write_snapshot(
        &mut self,
        file_name: &str,
        metadata: &SnapshotMetadata,
        header: &[&str],
        rows: &mut dyn Iterator<Item = Vec<String>>,
    ) -> AppResult<PathBuf> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (file_name, metadata, header, rows);
            return Err(DaqError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            use std::io::Write;

            if !self.available {
                return Err(DaqError::Storage(format!(
                    "Snapshot directory '{}' is not available",
                    self.output_dir.display()
                )));
            }

            let path = self.output_dir.join(file_name);
            let mut file = std::fs::File::create(&path).map_err(|e| {
                DaqError::Storage(format!("Failed to create '{}': {}", path.display(), e))
            })?;

            let json_string = serde_json::to_string(metadata)
                .map_err(|e| DaqError::Serialization(e.to_string()))?;
            let format = header.join(",");
            writeln!(
                file,
                "# SEEs Snapshot - Captured at: {:.6} seconds",
                metadata.trigger_time_us as f64 / 1_000_000.0
            )
            .and_then(|_| {
                writeln!(
                    file,
                    "# Window: ±{:.1} seconds ({:.1} seconds total)",
                    metadata.window_seconds,
                    metadata.window_seconds * 2.0
                )
            })
            .and_then(|_| writeln!(file, "# Samples: {}", metadata.samples))
            .and_then(|_| writeln!(file, "# Format: {}", format))
            .and_then(|_| writeln!(file, "# Metadata: {}", json_string))
            .map_err(|e| DaqError::Storage(e.to_string()))?;

            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record(header)
                .map_err(|e| DaqError::Storage(e.to_string()))?;
            for row in rows {
                writer
                    .write_record(&row)
                    .map_err(|e| DaqError::Storage(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| DaqError::Storage(e.to_string()))?;

            Ok(path)
        }
    }
}

/// Summary of a snapshot file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    /// Column names from the header row.
    pub columns: Vec<String>,
    /// Number of data rows.
    pub rows: usize,
    /// Rows with the `hit` column set.
    pub hits: Option<usize>,
    /// First and last values of the `timestamp_us` column.
    pub timestamp_range_us: Option<(u64, u64)>,
}

/// Read back a snapshot CSV, skipping `#` metadata lines.
pub fn read_snapshot_summary(path: &Path) -> AppResult<SnapshotSummary> {
    #[cfg(not(feature = "storage_csv"))]
    {
        let _ = path;
        return Err(DaqError::FeatureNotEnabled("storage_csv".to_string()));
    }

    #[cfg(feature = "storage_csv")]
    {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_path(path)
            .map_err(|e| DaqError::Storage(e.to_string()))?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| DaqError::Storage(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let hit_col = columns.iter().position(|c| c == "hit");
        let ts_col = columns.iter().position(|c| c == "timestamp_us");

        let mut rows = 0;
        let mut hits = 0;
        let mut first_ts = None;
        let mut last_ts = None;

        for record in reader.records() {
            let record = record.map_err(|e| DaqError::Storage(e.to_string()))?;
            rows += 1;
            if let Some(value) = hit_col.and_then(|i| record.get(i)) {
                if value.trim() == "1" {
                    hits += 1;
                }
            }
            if let Some(ts) = ts_col
                .and_then(|i| record.get(i))
                .and_then(|v| v.trim().parse::<u64>().ok())
            {
                first_ts.get_or_insert(ts);
                last_ts = Some(ts);
            }
        }

        Ok(SnapshotSummary {
            columns,
            rows,
            hits: hit_col.map(|_| hits),
            timestamp_range_us: first_ts.zip(last_ts),
        })
    }
}
