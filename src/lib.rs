//! # SEEs DAQ Core Library
//!
//! Acquisition core for the SEEs particle detector: a SiPM front-end sampled by an ADC, a pulse
//! detector that flags particle hits, and a "body-cam" rolling buffer from which a window of
//! history around a trigger can be captured on command.
//!
//! ## Crate Structure
//!
//! - **`data`**: Record layouts, the fixed-capacity [`data::ring_buffer::RingBuffer`], time-window
//!   extraction, the delta-encoded compact store and snapshot persistence sinks.
//! - **`detector`**: Hysteresis and refractory pulse detector, plus ADC count/volt conversion.
//! - **`snapshot`**: Captures a window around a trigger and delivers it to storage and the live
//!   channel.
//! - **`acquisition`**: The cooperative control loop tying commands, sampling, status and
//!   snapshots together.
//! - **`command`**: Parsing of the `on`/`off`/`snap` line protocol.
//! - **`status`**: Status LED patterns.
//! - **`hardware`**: Sample sources (simulated SiPM, replayed recordings) and a mock LED.
//! - **`config`**: Figment-based settings loaded from TOML and the environment.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: The crate-wide `DaqError`.
//! - **`validation`**: Helpers used by configuration validation.

pub mod acquisition;
pub mod command;
pub mod config;
pub mod data;
pub mod detector;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod snapshot;
pub mod status;
pub mod validation;
