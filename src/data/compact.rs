//! Delta-encoded sample store.
//!
//! Keeps every ADC reading in 6 bytes (5 bytes of payload plus alignment padding) by storing the
//! raw count and the microseconds since the previous reading instead of an absolute timestamp.
//! At 10 kS/s a 10 s history is 100 000 records, about 600 KB.
//!
//! Reconstruction walks the buffer oldest to newest and accumulates deltas, so times are relative
//! to the oldest surviving sample. The first delta in the walk is ignored: it refers to a sample
//! that has already been overwritten.

use tracing::info;

use crate::data::record::CompactSample;
use crate::data::ring_buffer::RingBuffer;
use crate::detector::AdcCalibration;
use crate::error::AppResult;

/// Rolling buffer of [`CompactSample`]s with a running hit total.
#[derive(Debug)]
pub struct CompactSampleBuffer {
    ring: RingBuffer<CompactSample>,
    last_time_us: u64,
    total_hits: u32,
}

/// A sample rebuilt from the compact encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructedSample {
    /// Milliseconds since the oldest surviving sample.
    pub time_ms: f64,
    /// Voltage from the raw count.
    pub voltage: f32,
    /// Hit flag.
    pub hit: bool,
    /// Hits counted from the oldest surviving sample up to and including this one.
    pub running_hits: u32,
}

impl CompactSampleBuffer {
    /// Column names for a dump of the buffer.
    pub const HEADER: &'static [&'static str] = &["time_ms", "voltage_V", "hit", "total_hits"];

    /// Allocate a buffer of `capacity` samples, starting the delta clock at `now_us`.
    pub fn try_with_capacity(capacity: usize, now_us: u64) -> AppResult<Self> {
        let ring = RingBuffer::try_with_capacity(capacity)?;
        info!(
            capacity,
            bytes = capacity.saturating_mul(std::mem::size_of::<CompactSample>()),
            "Compact sample buffer initialized (RAM mode)"
        );
        Ok(Self {
            ring,
            last_time_us: now_us,
            total_hits: 0,
        })
    }

    /// Record a reading taken at `now_us`.
    pub fn record(&mut self, adc_raw: u16, hit: bool, now_us: u64) {
        let delta = now_us.saturating_sub(self.last_time_us);
        self.last_time_us = now_us;

        self.ring.push(CompactSample {
            adc_raw,
            time_delta_us: CompactSample::saturating_delta(delta),
            hit,
        });

        if hit {
            self.total_hits = self.total_hits.saturating_add(1);
        }
    }

    /// Forget every sample and restart the delta clock at `now_us`.
    pub fn clear(&mut self, now_us: u64) {
        self.ring.clear();
        self.total_hits = 0;
        self.last_time_us = now_us;
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Maximum number of samples.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes held by the sample storage.
    pub fn memory_bytes(&self) -> usize {
        self.capacity().saturating_mul(std::mem::size_of::<CompactSample>())
    }

    /// Hits recorded since the last clear, including overwritten samples.
    pub fn total_hits(&self) -> u32 {
        self.total_hits
    }

    /// Raw access to the underlying ring.
    pub fn ring(&self) -> &RingBuffer<CompactSample> {
        &self.ring
    }

    /// Rebuild relative times, voltages and running hit counts, oldest first.
    pub fn reconstruct(
        &self,
        calibration: AdcCalibration,
    ) -> impl Iterator<Item = ReconstructedSample> + '_ {
        let mut elapsed_us: u64 = 0;
        let mut running_hits: u32 = 0;

        self.ring.iter().enumerate().map(move |(i, sample)| {
            if i > 0 {
                elapsed_us += u64::from(sample.time_delta_us);
            }
            if sample.hit {
                running_hits = running_hits.saturating_add(1);
            }
            ReconstructedSample {
                time_ms: elapsed_us as f64 / 1000.0,
                voltage: calibration.counts_to_volts(sample.adc_raw),
                hit: sample.hit,
                running_hits,
            }
        })
    }
}

impl ReconstructedSample {
    /// CSV row in [`CompactSampleBuffer::HEADER`] order.
    pub fn fields(&self) -> Vec<String> {
        vec![
            format!("{:.3}", self.time_ms),
            format!("{:.4}", self.voltage),
            u8::from(self.hit).to_string(),
            self.running_hits.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> AdcCalibration {
        AdcCalibration {
            bits: 12,
            vref: 3.3,
        }
    }

    #[test]
    fn records_deltas_between_samples() {
        let mut buffer = CompactSampleBuffer::try_with_capacity(8, 1_000).unwrap();
        buffer.record(100, false, 1_100);
        buffer.record(200, true, 1_250);

        let raw: Vec<_> = buffer.ring().iter().copied().collect();
        assert_eq!(raw[0].time_delta_us, 100);
        assert_eq!(raw[1].time_delta_us, 150);
        assert!(raw[1].hit);
        assert_eq!(buffer.total_hits(), 1);
    }

    #[test]
    fn long_gap_saturates() {
        let mut buffer = CompactSampleBuffer::try_with_capacity(4, 0).unwrap();
        buffer.record(1, false, 10);
        buffer.record(2, false, 10 + 200_000);
        let last = buffer.ring().newest().copied().unwrap();
        assert_eq!(last.time_delta_us, u16::MAX);

        // Reconstruction reproduces the clamp rather than the true 200 ms gap
        let times: Vec<f64> = buffer.reconstruct(calibration()).map(|s| s.time_ms).collect();
        assert_eq!(times, vec![0.0, 65.535]);
    }

    #[test]
    fn clock_going_backwards_records_zero_delta() {
        let mut buffer = CompactSampleBuffer::try_with_capacity(4, 500).unwrap();
        buffer.record(1, false, 400);
        assert_eq!(buffer.ring().newest().map(|s| s.time_delta_us), Some(0));
    }

    #[test]
    fn reconstruction_starts_at_oldest_survivor() {
        let mut buffer = CompactSampleBuffer::try_with_capacity(3, 0).unwrap();
        for (i, t) in [100u64, 200, 300, 450, 600].iter().enumerate() {
            buffer.record(4095, i == 3, *t);
        }

        let rebuilt: Vec<_> = buffer.reconstruct(calibration()).collect();
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt[0].time_ms, 0.0);
        assert_eq!(rebuilt[1].time_ms, 0.15);
        assert_eq!(rebuilt[2].time_ms, 0.3);
        assert!((rebuilt[0].voltage - 3.3).abs() < 1e-5);
        assert_eq!(
            rebuilt.iter().map(|s| s.running_hits).collect::<Vec<_>>(),
            vec![0, 1, 1]
        );
        // Total includes hits that have been overwritten since
        assert_eq!(buffer.total_hits(), 1);
    }

    #[test]
    fn clear_resets_counts_and_clock() {
        let mut buffer = CompactSampleBuffer::try_with_capacity(3, 0).unwrap();
        buffer.record(1, true, 100);
        buffer.clear(5_000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_hits(), 0);

        buffer.record(1, false, 5_100);
        assert_eq!(buffer.ring().oldest().map(|s| s.time_delta_us), Some(100));
    }

    #[test]
    fn memory_accounts_for_padding() {
        let buffer = CompactSampleBuffer::try_with_capacity(100_000, 0).unwrap();
        assert_eq!(std::mem::size_of::<CompactSample>(), 6);
        assert_eq!(buffer.memory_bytes(), 600_000);
    }

    #[test]
    fn row_format() {
        let row = ReconstructedSample {
            time_ms: 1.5,
            voltage: 0.25,
            hit: true,
            running_hits: 4,
        };
        assert_eq!(row.fields(), ["1.500", "0.2500", "1", "4"]);
    }
}
