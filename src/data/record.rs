//! Record types stored in the ring buffer.
//!
//! Three layouts are used depending on how much memory the instrument can spend per sample:
//!
//! - [`DetectorSample`]: every sample, with all derived fields. Largest, simplest to analyse.
//! - [`HitEvent`]: only samples flagged as hits. Memory is bounded by the hit rate instead of the
//!   sample rate.
//! - [`CompactSample`]: every sample in 6 bytes, with time stored as a saturating delta from the
//!   previous sample. See [`crate::data::compact`].

use serde::{Deserialize, Serialize};

/// Records that carry an absolute timestamp in microseconds.
///
/// Window extraction only needs this one accessor.
pub trait Timestamped {
    /// Absolute timestamp in microseconds.
    fn timestamp_us(&self) -> u64;
}

/// Records that can be written as a row of a snapshot CSV file.
pub trait SnapshotRecord: Timestamped + Copy + Default {
    /// Storage layout name recorded in snapshot metadata.
    const KIND: &'static str;

    /// Column names, in row order.
    const HEADER: &'static [&'static str];

    /// Field values in the same order as [`SnapshotRecord::HEADER`].
    fn fields(&self) -> Vec<String>;
}

/// Full-sample record, one per ADC reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorSample {
    /// Time since the start of the session in milliseconds.
    pub time_ms: f64,
    /// Converted ADC reading in volts.
    pub voltage: f32,
    /// Whether the detector declared a hit on this sample.
    pub hit: bool,
    /// Layer penetration count (1-4 on stacked detectors, 0 when no hit).
    pub layers: u8,
    /// Cumulative hit counter at this sample.
    pub cum_counts: u32,
    /// Absolute timestamp in microseconds.
    pub timestamp_us: u64,
}

impl Timestamped for DetectorSample {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

impl SnapshotRecord for DetectorSample {
    const KIND: &'static str = "full";
    const HEADER: &'static [&'static str] = &[
        "time_ms",
        "voltage_V",
        "hit",
        "layers",
        "cum_counts",
        "timestamp_us",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            format!("{:.3}", self.time_ms),
            format!("{:.4}", self.voltage),
            u8::from(self.hit).to_string(),
            self.layers.to_string(),
            self.cum_counts.to_string(),
            self.timestamp_us.to_string(),
        ]
    }
}

/// Hit-only record. Only created when a hit is detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitEvent {
    /// Absolute timestamp of the hit in microseconds.
    pub timestamp_us: u64,
    /// Layer penetration count.
    pub layers: u8,
}

impl Timestamped for HitEvent {
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

impl SnapshotRecord for HitEvent {
    const KIND: &'static str = "hits";
    const HEADER: &'static [&'static str] = &["timestamp_us", "layers"];

    fn fields(&self) -> Vec<String> {
        vec![self.timestamp_us.to_string(), self.layers.to_string()]
    }
}

/// Delta-encoded sample: 5 bytes of payload, 6 in memory with alignment.
///
/// `time_delta_us` holds the microseconds since the previous recorded sample, clamped to
/// [`CompactSample::MAX_DELTA_US`]. Gaps longer than that are under-reported; reconstruction
/// reproduces that clamp rather than guessing the true gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactSample {
    /// Raw ADC reading.
    pub adc_raw: u16,
    /// Microseconds since the previous sample, saturated.
    pub time_delta_us: u16,
    /// Hit flag.
    pub hit: bool,
}

impl CompactSample {
    /// Largest representable gap between two samples (65.535 ms).
    pub const MAX_DELTA_US: u16 = u16::MAX;

    /// Saturate a microsecond gap into the 16-bit delta field.
    pub fn saturating_delta(delta_us: u64) -> u16 {
        u16::try_from(delta_us).unwrap_or(Self::MAX_DELTA_US)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_sample_row_matches_header() {
        let sample = DetectorSample {
            time_ms: 12.3456,
            voltage: 0.51234,
            hit: true,
            layers: 1,
            cum_counts: 7,
            timestamp_us: 1_234_567,
        };
        let fields = sample.fields();
        assert_eq!(fields.len(), DetectorSample::HEADER.len());
        assert_eq!(fields, ["12.346", "0.5123", "1", "1", "7", "1234567"]);
    }

    #[test]
    fn hit_event_row_is_timestamp_then_layers() {
        let event = HitEvent {
            timestamp_us: 42,
            layers: 3,
        };
        assert_eq!(HitEvent::HEADER, &["timestamp_us", "layers"]);
        assert_eq!(event.fields(), ["42", "3"]);
    }

    #[test]
    fn delta_saturates_instead_of_truncating() {
        assert_eq!(CompactSample::saturating_delta(100), 100);
        assert_eq!(CompactSample::saturating_delta(65_535), 65_535);
        // 65_536 would truncate to 0 with an `as` cast
        assert_eq!(CompactSample::saturating_delta(65_536), u16::MAX);
        assert_eq!(CompactSample::saturating_delta(u64::MAX), u16::MAX);
    }
}
