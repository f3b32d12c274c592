//! Sample sources and status outputs.
//!
//! On the instrument the sample source is the ADC pin and the status output is the onboard LED.
//! On a host they are simulated ([`mock`]) or replayed from a recorded stream ([`replay`]).

pub mod mock;
pub mod replay;

pub use mock::{MockLed, MockSipm};
pub use replay::ReplaySource;

/// Produces raw ADC counts, one per call, at the cadence the caller polls it.
pub trait SampleSource {
    /// Take one reading.
    fn read_sample(&mut self) -> u16;

    /// Whether a finite source has run out of data. Live sources never do.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_sample(&mut self) -> u16 {
        (**self).read_sample()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}
