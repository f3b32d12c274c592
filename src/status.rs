//! Status LED patterns.
//!
//! The instrument has a single boolean output. [`StatusLed`] turns the acquisition state into a
//! pattern on it and only touches the pin when the level changes.

use std::time::Duration;

/// A single on/off output, such as the onboard LED.
pub trait StatusIndicator {
    /// Drive the output high or low.
    fn set_level(&mut self, on: bool);
}

/// What the indicator is currently telling the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    /// Buffers are being allocated. Solid on.
    Initializing,
    /// Samples are flowing into the buffer. Slow blink.
    Recording,
    /// Session stopped. Off.
    Idle,
    /// Unrecoverable fault, the system has halted. Fast blink.
    Fault,
}

/// Toggle period of the fault pattern.
pub const FAULT_BLINK: Duration = Duration::from_millis(100);

/// Blink state machine driven by the caller's clock.
#[derive(Debug, Clone)]
pub struct StatusLed {
    status: SystemStatus,
    blink_ms: u64,
    level: bool,
    last_toggle_ms: u64,
}

impl StatusLed {
    /// Start in [`SystemStatus::Initializing`]. `blink` is the recording toggle period.
    pub fn new(blink: Duration) -> Self {
        Self {
            status: SystemStatus::Initializing,
            blink_ms: u64::try_from(blink.as_millis()).unwrap_or(u64::MAX).max(1),
            level: true,
            last_toggle_ms: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> SystemStatus {
        self.status
    }

    /// Level last written to the indicator.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Switch pattern and apply its initial level immediately.
    pub fn set_status(
        &mut self,
        status: SystemStatus,
        now_ms: u64,
        indicator: &mut dyn StatusIndicator,
    ) {
        if status == self.status {
            return;
        }
        tracing::debug!(?status, "Status indicator changed");
        self.status = status;
        self.last_toggle_ms = now_ms;
        self.level = !matches!(status, SystemStatus::Idle);
        indicator.set_level(self.level);
    }

    /// Advance the pattern to `now_ms`.
    pub fn update(&mut self, now_ms: u64, indicator: &mut dyn StatusIndicator) {
        let period = match self.status {
            SystemStatus::Initializing | SystemStatus::Idle => return,
            SystemStatus::Recording => self.blink_ms,
            SystemStatus::Fault => FAULT_BLINK.as_millis() as u64,
        };
        if now_ms.saturating_sub(self.last_toggle_ms) >= period {
            self.level = !self.level;
            self.last_toggle_ms = now_ms;
            indicator.set_level(self.level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<bool>);

    impl StatusIndicator for Recorder {
        fn set_level(&mut self, on: bool) {
            self.0.push(on);
        }
    }

    #[test]
    fn recording_blinks_at_period() {
        let mut led = StatusLed::new(Duration::from_millis(500));
        let mut pin = Recorder::default();
        led.set_status(SystemStatus::Recording, 0, &mut pin);

        for now in (0..=1_500).step_by(50) {
            led.update(now, &mut pin);
        }
        // Initial on, then toggles at 500, 1000, 1500
        assert_eq!(pin.0, vec![true, false, true, false]);
    }

    #[test]
    fn idle_is_off_and_steady() {
        let mut led = StatusLed::new(Duration::from_millis(500));
        let mut pin = Recorder::default();
        led.set_status(SystemStatus::Idle, 10, &mut pin);
        led.update(5_000, &mut pin);
        assert_eq!(pin.0, vec![false]);
        assert!(!led.level());
    }

    #[test]
    fn fault_blinks_faster_than_recording() {
        let mut led = StatusLed::new(Duration::from_millis(500));
        let mut pin = Recorder::default();
        led.set_status(SystemStatus::Fault, 0, &mut pin);
        for now in (0..500).step_by(10) {
            led.update(now, &mut pin);
        }
        assert!(pin.0.len() >= 5);
    }

    #[test]
    fn same_status_does_not_rewrite_pin() {
        let mut led = StatusLed::new(Duration::from_millis(500));
        let mut pin = Recorder::default();
        led.set_status(SystemStatus::Recording, 0, &mut pin);
        led.set_status(SystemStatus::Recording, 100, &mut pin);
        assert_eq!(pin.0.len(), 1);
        assert_eq!(led.status(), SystemStatus::Recording);
    }
}
