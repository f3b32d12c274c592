//! Replay a recorded live stream as a sample source.
//!
//! Accepts the same `time_ms,voltage_V,hit,total_hits` lines the acquisition loop streams. Lines
//! that are not four numeric fields (status messages, headers, snapshot markers) are skipped.
//! Once the recording runs out the last voltage is held, as the input of a real ADC would be.

use std::io::BufRead;
use std::path::Path;

use crate::detector::AdcCalibration;
use crate::error::{AppResult, DaqError};
use crate::hardware::SampleSource;

/// Sample source backed by a recorded voltage trace.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    calibration: AdcCalibration,
    voltages: Vec<f32>,
    position: usize,
}

impl ReplaySource {
    /// Load every data line from `reader`.
    pub fn from_reader(reader: impl BufRead, calibration: AdcCalibration) -> AppResult<Self> {
        let mut voltages = Vec::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            match parse_stream_line(&line?) {
                Some(volts) => voltages.push(volts),
                None => skipped += 1,
            }
        }
        if voltages.is_empty() {
            return Err(DaqError::SampleSource(
                "Replay input contains no data lines".to_string(),
            ));
        }
        tracing::info!(samples = voltages.len(), skipped, "Replay source loaded");
        Ok(Self {
            calibration,
            voltages,
            position: 0,
        })
    }

    /// Load a recording from disk.
    pub fn from_path(path: &Path, calibration: AdcCalibration) -> AppResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            DaqError::SampleSource(format!("Cannot open '{}': {}", path.display(), e))
        })?;
        Self::from_reader(std::io::BufReader::new(file), calibration)
    }

    /// Samples in the recording.
    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    /// Whether the recording is empty. Never true for a loaded source.
    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    /// Samples read so far.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Voltage field of a `time_ms,voltage_V,hit,total_hits` line.
fn parse_stream_line(line: &str) -> Option<f32> {
    let mut fields = line.trim().split(',');
    let _time_ms: f32 = fields.next()?.trim().parse().ok()?;
    let voltage: f32 = fields.next()?.trim().parse().ok()?;
    let _hit: u32 = fields.next()?.trim().parse().ok()?;
    let _total: u32 = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(voltage)
}

impl SampleSource for ReplaySource {
    fn read_sample(&mut self) -> u16 {
        let index = self.position.min(self.voltages.len().saturating_sub(1));
        let volts = self.voltages.get(index).copied().unwrap_or(0.0);
        if self.position < self.voltages.len() {
            self.position += 1;
        }
        self.calibration.volts_to_counts(volts)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.voltages.len()
    }
}
