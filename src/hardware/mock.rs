//! Simulated detector front-end and status LED.
//!
//! `MockSipm` produces a noisy baseline with randomly timed pulses that decay exponentially, in
//! ADC counts. Some pulses are drawn above the detector's upper limit so the saturation path gets
//! exercised too.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detector::AdcCalibration;
use crate::hardware::SampleSource;
use crate::status::StatusIndicator;

/// Simulated SiPM output sampled by the ADC.
#[derive(Debug)]
pub struct MockSipm {
    calibration: AdcCalibration,
    rng: StdRng,
    baseline_v: f32,
    noise_v: f32,
    pulse_probability: f64,
    pulse_v: f32,
    decay: f32,
}

impl MockSipm {
    /// Baseline voltage of the front-end with no light.
    pub const BASELINE_V: f32 = 0.05;
    /// Peak-to-peak baseline noise.
    pub const NOISE_V: f32 = 0.02;

    /// Pulses arrive at `pulse_rate_hz` on average when sampled at `sample_rate_hz`.
    ///
    /// A `seed` makes the sequence reproducible.
    pub fn new(
        calibration: AdcCalibration,
        sample_rate_hz: u32,
        pulse_rate_hz: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pulse_probability = if sample_rate_hz == 0 {
            0.0
        } else {
            (pulse_rate_hz / f64::from(sample_rate_hz)).clamp(0.0, 1.0)
        };
        Self {
            calibration,
            rng,
            baseline_v: Self::BASELINE_V,
            noise_v: Self::NOISE_V,
            pulse_probability,
            pulse_v: 0.0,
            decay: 0.6,
        }
    }

    fn next_voltage(&mut self) -> f32 {
        self.pulse_v *= self.decay;
        if self.pulse_v < 1e-3 {
            self.pulse_v = 0.0;
        }
        if self.pulse_probability > 0.0 && self.rng.gen_bool(self.pulse_probability) {
            self.pulse_v = self.rng.gen_range(0.35f32..1.1);
        }
        let noise = self.rng.gen_range(-0.5f32..=0.5) * self.noise_v;
        self.baseline_v + noise + self.pulse_v
    }
}

impl SampleSource for MockSipm {
    fn read_sample(&mut self) -> u16 {
        let volts = self.next_voltage();
        self.calibration.volts_to_counts(volts)
    }
}

/// Status output that remembers its level and counts transitions.
#[derive(Debug, Default, Clone)]
pub struct MockLed {
    level: bool,
    transitions: u32,
}

impl MockLed {
    /// Current level.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Number of times the level has been written.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }
}

impl StatusIndicator for MockLed {
    fn set_level(&mut self, on: bool) {
        tracing::trace!(on, "LED");
        self.level = on;
        self.transitions = self.transitions.saturating_add(1);
    }
}
