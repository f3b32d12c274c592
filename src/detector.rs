//! Windowed pulse detector with hysteresis and a refractory period.
//!
//! Every ADC sample is classified as hit or not by a two-state machine:
//!
//! ```text
//!            v in [lower_enter, upper_limit]
//!            and refractory elapsed  => HIT
//!   Armed  --------------------------------->  Disarmed
//!     ^                                            |
//!     +---------------- v < lower_exit ------------+
//! ```
//!
//! The upper limit rejects saturated or out-of-range excursions, hysteresis keeps a pulse that
//! lingers near the threshold from firing twice, and the refractory period caps the hit rate
//! independently of the signal shape.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// ADC resolution and reference voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdcCalibration {
    /// ADC resolution in bits.
    pub bits: u8,
    /// Full-scale reference voltage.
    pub vref: f32,
}

impl Default for AdcCalibration {
    fn default() -> Self {
        Self {
            bits: 12,
            vref: 3.3,
        }
    }
}

impl AdcCalibration {
    /// Largest raw count.
    pub fn max_count(&self) -> u16 {
        match self.bits {
            0 => 0,
            b if b >= 16 => u16::MAX,
            b => (1u16 << b) - 1,
        }
    }

    /// Convert a raw count into volts.
    pub fn counts_to_volts(&self, raw: u16) -> f32 {
        match self.max_count() {
            0 => 0.0,
            max => f32::from(raw) * self.vref / f32::from(max),
        }
    }

    /// Convert volts into a raw count, clamped to the ADC range.
    pub fn volts_to_counts(&self, volts: f32) -> u16 {
        let max = self.max_count();
        if volts.is_nan() || volts <= 0.0 || self.vref <= 0.0 {
            return 0;
        }
        let counts = volts / self.vref * f32::from(max);
        if counts >= f32::from(max) {
            max
        } else {
            counts as u16
        }
    }
}

/// Voltage window and refractory period for hit detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorThresholds {
    /// Lowest voltage that counts as a hit while armed.
    pub lower_enter_v: f32,
    /// The detector re-arms once the signal drops below this.
    pub lower_exit_v: f32,
    /// Highest voltage that counts as a hit.
    pub upper_limit_v: f32,
    /// Minimum time between consecutive hits.
    pub refractory_us: u64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            lower_enter_v: 0.30,
            lower_exit_v: 0.30,
            upper_limit_v: 0.80,
            refractory_us: 300,
        }
    }
}

impl DetectorThresholds {
    /// Check `lower_exit <= lower_enter <= upper_limit`.
    pub fn validate(&self) -> AppResult<()> {
        let levels = [self.lower_enter_v, self.lower_exit_v, self.upper_limit_v];
        if !levels.iter().all(|v| v.is_finite()) {
            return Err(DaqError::Configuration(
                "Detector thresholds must be finite voltages".to_string(),
            ));
        }
        if self.lower_exit_v > self.lower_enter_v {
            return Err(DaqError::Configuration(format!(
                "lower_exit_v ({}) must not exceed lower_enter_v ({})",
                self.lower_exit_v, self.lower_enter_v
            )));
        }
        if self.lower_enter_v > self.upper_limit_v {
            return Err(DaqError::Configuration(format!(
                "lower_enter_v ({}) must not exceed upper_limit_v ({})",
                self.lower_enter_v, self.upper_limit_v
            )));
        }
        Ok(())
    }

    fn in_window(&self, volts: f32) -> bool {
        volts >= self.lower_enter_v && volts <= self.upper_limit_v
    }
}

/// Detector arm state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArmState {
    /// Waiting for a qualifying excursion.
    #[default]
    Armed,
    /// A hit fired; waiting for the signal to fall below `lower_exit`.
    Disarmed,
}

/// Result of one detector step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// State after the sample.
    pub state: ArmState,
    /// Whether the sample was a hit.
    pub hit: bool,
}

impl ArmState {
    /// Pure transition for one sample at `t_us` with voltage `volts`.
    ///
    /// `last_hit_us` is `None` until the first hit, so the refractory period does not suppress
    /// the very first pulse.
    pub fn step(
        self,
        thresholds: &DetectorThresholds,
        last_hit_us: Option<u64>,
        t_us: u64,
        volts: f32,
    ) -> Step {
        match self {
            ArmState::Armed => {
                let refractory_elapsed = last_hit_us
                    .map_or(true, |last| t_us.saturating_sub(last) >= thresholds.refractory_us);
                if thresholds.in_window(volts) && refractory_elapsed {
                    Step {
                        state: ArmState::Disarmed,
                        hit: true,
                    }
                } else {
                    Step {
                        state: ArmState::Armed,
                        hit: false,
                    }
                }
            }
            ArmState::Disarmed => Step {
                state: if volts < thresholds.lower_exit_v {
                    ArmState::Armed
                } else {
                    ArmState::Disarmed
                },
                hit: false,
            },
        }
    }
}

/// Stateful detector: arm state, last hit time and running hit counter.
#[derive(Debug, Clone)]
pub struct PulseDetector {
    thresholds: DetectorThresholds,
    state: ArmState,
    last_hit_us: Option<u64>,
    total_hits: u32,
}

impl PulseDetector {
    /// Create an armed detector with no hits.
    pub fn new(thresholds: DetectorThresholds) -> Self {
        Self {
            thresholds,
            state: ArmState::Armed,
            last_hit_us: None,
            total_hits: 0,
        }
    }

    /// Classify one sample. Returns `true` on a hit.
    pub fn process(&mut self, t_us: u64, volts: f32) -> bool {
        let step = self
            .state
            .step(&self.thresholds, self.last_hit_us, t_us, volts);
        self.state = step.state;
        if step.hit {
            self.total_hits = self.total_hits.saturating_add(1);
            self.last_hit_us = Some(t_us);
        }
        step.hit
    }

    /// Back to armed with a zero counter.
    pub fn reset(&mut self) {
        self.state = ArmState::Armed;
        self.last_hit_us = None;
        self.total_hits = 0;
    }

    /// Current arm state.
    pub fn state(&self) -> ArmState {
        self.state
    }

    /// Hits since construction or the last reset.
    pub fn total_hits(&self) -> u32 {
        self.total_hits
    }

    /// Timestamp of the most recent hit.
    pub fn last_hit_us(&self) -> Option<u64> {
        self.last_hit_us
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }
}
