//! The acquisition loop.
//!
//! [`Acquisition`] owns everything the instrument does between power-up and power-down: the
//! detector, the rolling store, the snapshot coordinator and the status LED. The caller drives it
//! with a clock; every pass it
//!
//! 1. handles a command line if one arrived ([`Acquisition::handle_line`]),
//! 2. advances the status pattern, takes every sample that has come due and finishes a pending
//!    snapshot once its post-trigger deadline has passed ([`Acquisition::service`]).
//!
//! Nothing here blocks. The post-trigger wait of a snapshot is a deadline checked on each pass,
//! so sampling carries on into the buffer while the wait runs.
//!
//! # Operating modes
//!
//! - [`OperatingMode::BodyCam`]: recording starts at power-up and never stops. Only `snap` is
//!   meaningful.
//! - [`OperatingMode::Session`]: `on` clears the buffer, resets the detector and starts a
//!   recording session; `off` stops it and cancels a pending snapshot.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::command::{self, Command};
use crate::config::Settings;
use crate::data::compact::CompactSampleBuffer;
use crate::data::record::{CompactSample, DetectorSample, HitEvent};
use crate::data::ring_buffer::RingBuffer;
use crate::data::storage::SnapshotSink;
use crate::detector::{AdcCalibration, PulseDetector};
use crate::error::{AppResult, DaqError};
use crate::hardware::SampleSource;
use crate::snapshot::{SnapshotCoordinator, SnapshotReport};
use crate::status::{StatusIndicator, StatusLed, SystemStatus};

/// Prefix of every status line on the live channel.
pub const STATUS_PREFIX: &str = "[SEEs]";

/// Column order of the live sample stream.
pub const STREAM_HEADER: &str = "time_ms,voltage_V,hit,total_hits";

/// Streamed samples between flushes of the live channel.
const FLUSH_EVERY: u32 = 100;

/// Line-oriented output to the host.
pub trait LiveChannel {
    /// Whether anything is listening.
    fn is_connected(&self) -> bool {
        true
    }

    /// Send one line, without its terminator.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Push buffered lines out.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Live channel over any writer, such as stdout.
#[derive(Debug)]
pub struct WriterChannel<W: Write> {
    writer: W,
}

impl<W: Write> WriterChannel<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LiveChannel for WriterChannel<W> {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Live channel that keeps every line in memory.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    lines: Vec<String>,
    connected: bool,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            connected: true,
        }
    }
}

impl MemoryChannel {
    /// A channel with no host attached. Sends are dropped.
    pub fn disconnected() -> Self {
        Self {
            lines: Vec::new(),
            connected: false,
        }
    }

    /// Lines received so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Take the received lines, leaving the channel empty.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl LiveChannel for MemoryChannel {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_line(&mut self, line: &str) -> io::Result<()> {
        if !self.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no host"));
        }
        self.lines.push(line.to_string());
        Ok(())
    }
}

/// Record layout kept in the rolling store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Every sample with derived fields.
    Full,
    /// Hit events only.
    Hits,
    /// Every sample, delta-encoded.
    Compact,
}

/// How recording is started and stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Always recording.
    BodyCam,
    /// Recording between `on` and `off`.
    Session,
}

#[derive(Debug)]
enum SampleStore {
    Full {
        ring: RingBuffer<DetectorSample>,
        snapshots: SnapshotCoordinator<DetectorSample>,
    },
    Hits {
        ring: RingBuffer<HitEvent>,
        snapshots: SnapshotCoordinator<HitEvent>,
    },
    Compact {
        buffer: CompactSampleBuffer,
        snapshots: SnapshotCoordinator<CompactSample>,
    },
}

impl SampleStore {
    fn allocate(settings: &Settings, now_us: u64) -> AppResult<Self> {
        let acq = &settings.acquisition;
        let window_us = settings.snapshot.window_us();
        let store = match acq.storage_mode {
            StorageMode::Full => SampleStore::Full {
                ring: RingBuffer::for_duration(acq.sample_rate_hz, acq.buffer_seconds)?,
                snapshots: SnapshotCoordinator::for_rate(window_us, acq.sample_rate_hz)?,
            },
            StorageMode::Hits => SampleStore::Hits {
                ring: RingBuffer::try_with_capacity(acq.max_hits)?,
                snapshots: SnapshotCoordinator::try_new(window_us, acq.max_hits)?,
            },
            StorageMode::Compact => {
                let capacity = usize::try_from(acq.sample_rate_hz)
                    .ok()
                    .and_then(|rate| rate.checked_mul(acq.buffer_seconds as usize))
                    .ok_or_else(|| {
                        DaqError::Configuration("Compact buffer size overflows".to_string())
                    })?;
                SampleStore::Compact {
                    buffer: CompactSampleBuffer::try_with_capacity(capacity, now_us)?,
                    snapshots: SnapshotCoordinator::try_new(window_us, 0)?,
                }
            }
        };
        Ok(store)
    }

    fn mode(&self) -> StorageMode {
        match self {
            SampleStore::Full { .. } => StorageMode::Full,
            SampleStore::Hits { .. } => StorageMode::Hits,
            SampleStore::Compact { .. } => StorageMode::Compact,
        }
    }

    fn len(&self) -> usize {
        match self {
            SampleStore::Full { ring, .. } => ring.len(),
            SampleStore::Hits { ring, .. } => ring.len(),
            SampleStore::Compact { buffer, .. } => buffer.len(),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            SampleStore::Full { ring, .. } => ring.capacity(),
            SampleStore::Hits { ring, .. } => ring.capacity(),
            SampleStore::Compact { buffer, .. } => buffer.capacity(),
        }
    }

    fn clear(&mut self, now_us: u64) {
        match self {
            SampleStore::Full { ring, .. } => ring.clear(),
            SampleStore::Hits { ring, .. } => ring.clear(),
            SampleStore::Compact { buffer, .. } => buffer.clear(now_us),
        }
    }

    fn snap_count(&self) -> u32 {
        match self {
            SampleStore::Full { snapshots, .. } => snapshots.snap_count(),
            SampleStore::Hits { snapshots, .. } => snapshots.snap_count(),
            SampleStore::Compact { snapshots, .. } => snapshots.snap_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSnapshot {
    trigger_us: u64,
    deadline_us: u64,
}

/// Counters for the running session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Samples taken since the session started.
    pub samples: u64,
    /// Hits declared since the session started.
    pub hits: u32,
    /// Records currently held in the store.
    pub stored: usize,
    /// Store capacity.
    pub capacity: usize,
    /// Successful snapshots.
    pub snapshots: u32,
    /// Samples skipped because the loop fell too far behind.
    pub dropped: u64,
}

/// Owns the detector, the store and the peripherals, and runs the cooperative loop.
pub struct Acquisition<S, K, L, I> {
    source: S,
    sink: K,
    live: L,
    indicator: I,
    calibration: AdcCalibration,
    detector: PulseDetector,
    store: SampleStore,
    status: StatusLed,
    operating_mode: OperatingMode,
    sample_rate_hz: u64,
    max_catch_up: u64,
    post_trigger_us: u64,
    stream_samples: bool,
    recording: bool,
    session_start_us: u64,
    next_index: u64,
    pending: Option<PendingSnapshot>,
    samples: u64,
    dropped: u64,
    since_flush: u32,
    last_report: Option<SnapshotReport>,
}

impl<S, K, L, I> Acquisition<S, K, L, I>
where
    S: SampleSource,
    K: SnapshotSink,
    L: LiveChannel,
    I: StatusIndicator,
{
    /// Validate `settings`, allocate buffers and wire up the peripherals.
    ///
    /// Settings that [`Settings::validate`] rejects are returned as
    /// [`DaqError::Configuration`]. Allocation failure is returned as [`DaqError::Allocation`];
    /// the caller must show the fault pattern and halt.
    pub fn new(
        settings: &Settings,
        source: S,
        sink: K,
        live: L,
        mut indicator: I,
        now_us: u64,
    ) -> AppResult<Self> {
        settings.validate()?;

        let mut status = StatusLed::new(std::time::Duration::from_millis(settings.status.blink_ms));
        indicator.set_level(status.level());

        let store = SampleStore::allocate(settings, now_us).inspect_err(|e| {
            error!(error = %e, "Failed to allocate sample store");
        })?;
        status.set_status(SystemStatus::Idle, now_us / 1_000, &mut indicator);

        Ok(Self {
            source,
            sink,
            live,
            indicator,
            calibration: settings.acquisition.adc,
            detector: PulseDetector::new(settings.detector),
            store,
            status,
            operating_mode: settings.acquisition.operating_mode,
            sample_rate_hz: u64::from(settings.acquisition.sample_rate_hz.max(1)),
            // Catch up at most a tenth of a second of samples per pass
            max_catch_up: u64::from(settings.acquisition.sample_rate_hz / 10).max(1),
            post_trigger_us: settings.snapshot.post_trigger_us(),
            stream_samples: true,
            recording: false,
            session_start_us: now_us,
            next_index: 0,
            pending: None,
            samples: 0,
            dropped: 0,
            since_flush: 0,
            last_report: None,
        })
    }

    /// Enable or disable per-sample streaming. Status lines and snapshots are always sent.
    pub fn set_stream_samples(&mut self, enabled: bool) {
        self.stream_samples = enabled;
    }

    /// Announce the instrument and, in body-cam mode, start recording.
    pub fn start(&mut self, now_us: u64) {
        self.status_line("====================================");
        self.status_line("SEEs Particle Detector - Starting");
        self.status_line("====================================");
        self.status_line(&format!(
            "Buffer: {} records ({} mode)",
            self.store.capacity(),
            storage_mode_name(self.store.mode())
        ));
        match self.operating_mode {
            OperatingMode::BodyCam => {
                self.status_line("Body cam mode: ALWAYS streaming");
                self.status_line("Commands: snap");
                self.begin_recording(now_us);
            }
            OperatingMode::Session => {
                self.status_line("Session mode: send 'on' to start recording");
                self.status_line("Commands: on, off, snap");
            }
        }
        self.status_line(&format!("Data format: {}", STREAM_HEADER));
        info!(
            mode = ?self.operating_mode,
            storage = storage_mode_name(self.store.mode()),
            capacity = self.store.capacity(),
            "Acquisition started"
        );
    }

    /// Parse and handle one command line. Blank lines are ignored; unknown commands are reported.
    pub fn handle_line(&mut self, line: &str, now_us: u64) {
        match command::parse_line(line) {
            Ok(Some(cmd)) => self.handle_command(cmd, now_us),
            Ok(None) => {}
            Err(unknown) => {
                debug!(input = %unknown.0, "Unknown command");
                self.status_line(&unknown.to_string());
            }
        }
    }

    /// Handle a parsed command.
    pub fn handle_command(&mut self, cmd: Command, now_us: u64) {
        info!(command = %cmd, now_us, "Command received");
        match (cmd, self.operating_mode) {
            (Command::Snap, _) => self.request_snapshot(now_us),
            (Command::On, OperatingMode::Session) => {
                if self.recording {
                    self.status_line("Already recording");
                } else {
                    self.store.clear(now_us);
                    self.detector.reset();
                    self.begin_recording(now_us);
                }
            }
            (Command::Off, OperatingMode::Session) => {
                if !self.recording {
                    self.status_line("Not recording");
                    return;
                }
                if self.pending.take().is_some() {
                    self.status_line("Pending snap cancelled");
                }
                self.recording = false;
                self.status
                    .set_status(SystemStatus::Idle, now_us / 1_000, &mut self.indicator);
                self.status_line(&format!(
                    "Recording stopped: {} samples, {} hits",
                    self.samples,
                    self.detector.total_hits()
                ));
                self.flush_live();
            }
            (Command::On | Command::Off, OperatingMode::BodyCam) => {
                self.status_line(&format!("Body cam mode is always recording, '{}' ignored", cmd));
            }
        }
    }

    /// Run one pass of the loop at `now_us`.
    pub fn service(&mut self, now_us: u64) {
        self.status.update(now_us / 1_000, &mut self.indicator);

        if self.recording {
            self.take_due_samples(now_us);
        }

        if let Some(pending) = self.pending {
            if now_us >= pending.deadline_us {
                self.pending = None;
                self.finish_snapshot(pending.trigger_us);
            }
        }
    }

    fn take_due_samples(&mut self, now_us: u64) {
        let Some(elapsed_us) = now_us.checked_sub(self.session_start_us) else {
            return;
        };
        // Index of the newest sample whose scheduled time is at or before now
        let last_due = elapsed_us.saturating_mul(self.sample_rate_hz) / 1_000_000;
        if last_due < self.next_index {
            return;
        }
        let due = last_due - self.next_index + 1;
        if due > self.max_catch_up {
            let skipped = due - self.max_catch_up;
            self.dropped = self.dropped.saturating_add(skipped);
            self.next_index += skipped;
            warn!(skipped, "Acquisition loop fell behind, samples skipped");
        }
        while self.next_index <= last_due {
            let t_us = self.sample_time_us(self.next_index);
            self.take_sample(t_us);
            self.next_index += 1;
        }
    }

    /// Scheduled time of sample `index` of the session, `ceil(index * 1e6 / rate)` after its
    /// start, so the cadence never drifts from the configured rate.
    fn sample_time_us(&self, index: u64) -> u64 {
        let offset_us = index
            .saturating_mul(1_000_000)
            .div_ceil(self.sample_rate_hz);
        self.session_start_us.saturating_add(offset_us)
    }

    fn take_sample(&mut self, t_us: u64) {
        let raw = self.source.read_sample();
        let volts = self.calibration.counts_to_volts(raw);
        let hit = self.detector.process(t_us, volts);
        let total_hits = self.detector.total_hits();
        let time_ms = t_us.saturating_sub(self.session_start_us) as f64 / 1_000.0;
        self.samples = self.samples.saturating_add(1);

        match &mut self.store {
            SampleStore::Full { ring, .. } => ring.push(DetectorSample {
                time_ms,
                voltage: volts,
                hit,
                layers: u8::from(hit),
                cum_counts: total_hits,
                timestamp_us: t_us,
            }),
            SampleStore::Hits { ring, .. } => {
                if hit {
                    ring.push(HitEvent {
                        timestamp_us: t_us,
                        layers: 1,
                    });
                }
            }
            SampleStore::Compact { buffer, .. } => buffer.record(raw, hit, t_us),
        }

        if self.stream_samples {
            let line = format_stream_line(time_ms, volts, hit, total_hits);
            if let Err(e) = self.live.send_line(&line) {
                debug!(error = %e, "Live channel rejected sample");
            }
            self.since_flush += 1;
            if self.since_flush >= FLUSH_EVERY {
                self.flush_live();
            }
        }
    }

    fn begin_recording(&mut self, now_us: u64) {
        self.recording = true;
        self.session_start_us = now_us;
        self.next_index = 0;
        self.samples = 0;
        self.status
            .set_status(SystemStatus::Recording, now_us / 1_000, &mut self.indicator);
        self.status_line("Ready - buffer recording started");
    }

    fn request_snapshot(&mut self, now_us: u64) {
        if self.pending.is_some() {
            self.status_line("Snap already pending, ignoring");
            return;
        }
        self.status_line("SNAP command received");
        if self.recording && self.post_trigger_us > 0 {
            self.status_line(&format!(
                "Waiting {:.1}s for post-trigger data...",
                self.post_trigger_us as f64 / 1e6
            ));
            self.pending = Some(PendingSnapshot {
                trigger_us: now_us,
                deadline_us: now_us.saturating_add(self.post_trigger_us),
            });
        } else {
            // Nothing more will arrive, extract right away
            self.finish_snapshot(now_us);
        }
    }

    fn finish_snapshot(&mut self, trigger_us: u64) {
        let result = match &mut self.store {
            SampleStore::Full { ring, snapshots } => {
                snapshots.capture(ring, trigger_us, &mut self.sink, &mut self.live)
            }
            SampleStore::Hits { ring, snapshots } => {
                snapshots.capture(ring, trigger_us, &mut self.sink, &mut self.live)
            }
            SampleStore::Compact { buffer, snapshots } => snapshots.dump_compact(
                buffer,
                self.calibration,
                trigger_us,
                &mut self.sink,
                &mut self.live,
            ),
        };

        match result {
            Ok(report) => {
                let destination = match &report.path {
                    Some(path) => path.display().to_string(),
                    None => "not saved".to_string(),
                };
                self.status_line(&format!(
                    "Snap captured: {} samples -> {}",
                    report.samples, destination
                ));
                self.status_line("Snap complete");
                self.last_report = Some(report);
            }
            Err(e) => {
                warn!(error = %e, trigger_us, "Snapshot failed");
                self.status_line(&format!("Snap failed: {}", e));
            }
        }
        self.flush_live();
    }

    fn status_line(&mut self, message: &str) {
        let line = format!("{} {}", STATUS_PREFIX, message);
        if let Err(e) = self.live.send_line(&line) {
            debug!(error = %e, "Live channel rejected status line");
        }
        self.flush_live();
    }

    fn flush_live(&mut self) {
        self.since_flush = 0;
        if let Err(e) = self.live.flush() {
            debug!(error = %e, "Live channel flush failed");
        }
    }

    /// Whether samples are being recorded.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether a snapshot is waiting for its post-trigger deadline.
    pub fn has_pending_snapshot(&self) -> bool {
        self.pending.is_some()
    }

    /// Deadline of the pending snapshot.
    pub fn pending_deadline_us(&self) -> Option<u64> {
        self.pending.map(|p| p.deadline_us)
    }

    /// Report of the most recent successful snapshot.
    pub fn last_report(&self) -> Option<&SnapshotReport> {
        self.last_report.as_ref()
    }

    /// Current status pattern.
    pub fn system_status(&self) -> SystemStatus {
        self.status.status()
    }

    /// Record layout in use.
    pub fn storage_mode(&self) -> StorageMode {
        self.store.mode()
    }

    /// Session counters.
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            samples: self.samples,
            hits: self.detector.total_hits(),
            stored: self.store.len(),
            capacity: self.store.capacity(),
            snapshots: self.store.snap_count(),
            dropped: self.dropped,
        }
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The persistence sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// The live channel.
    pub fn live(&self) -> &L {
        &self.live
    }

    /// The live channel, mutably.
    pub fn live_mut(&mut self) -> &mut L {
        &mut self.live
    }

    /// The status output.
    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Flush the live channel and hand the peripherals back.
    pub fn shutdown(mut self) -> (S, K, L, I) {
        if self.pending.take().is_some() {
            self.status_line("Shutting down, pending snap dropped");
        }
        self.flush_live();
        info!(samples = self.samples, hits = self.detector.total_hits(), "Acquisition stopped");
        (self.source, self.sink, self.live, self.indicator)
    }
}

/// One live-stream line: `time_ms,voltage_V,hit,total_hits`.
pub fn format_stream_line(time_ms: f64, volts: f32, hit: bool, total_hits: u32) -> String {
    format!("{:.3},{:.4},{},{}", time_ms, volts, u8::from(hit), total_hits)
}

fn storage_mode_name(mode: StorageMode) -> &'static str {
    match mode {
        StorageMode::Full => "full",
        StorageMode::Hits => "hits",
        StorageMode::Compact => "compact",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::UnavailableSink;
    use crate::hardware::MockLed;

    /// Replays a fixed voltage trace, then holds the last value.
    struct Trace {
        counts: Vec<u16>,
        next: usize,
    }

    impl Trace {
        fn volts(volts: &[f32]) -> Self {
            let cal = AdcCalibration::default();
            Self {
                counts: volts.iter().map(|v| cal.volts_to_counts(*v)).collect(),
                next: 0,
            }
        }
    }

    impl SampleSource for Trace {
        fn read_sample(&mut self) -> u16 {
            let i = self.next.min(self.counts.len() - 1);
            self.next += 1;
            self.counts[i]
        }
    }

    type TestAcq = Acquisition<Trace, UnavailableSink, MemoryChannel, MockLed>;

    fn settings(mode: OperatingMode, storage: StorageMode) -> Settings {
        let mut settings = Settings::default();
        settings.acquisition.sample_rate_hz = 10_000;
        settings.acquisition.buffer_seconds = 1;
        settings.acquisition.max_hits = 16;
        settings.acquisition.operating_mode = mode;
        settings.acquisition.storage_mode = storage;
        settings.snapshot.window_seconds = 0.001;
        settings.snapshot.post_trigger_seconds = 0.001;
        settings
    }

    fn acquisition(settings: &Settings, trace: &[f32]) -> TestAcq {
        Acquisition::new(
            settings,
            Trace::volts(trace),
            UnavailableSink,
            MemoryChannel::default(),
            MockLed::default(),
            0,
        )
        .unwrap()
    }

    fn status_lines(acq: &TestAcq) -> Vec<String> {
        acq.live()
            .lines()
            .iter()
            .filter(|l| l.starts_with(STATUS_PREFIX))
            .cloned()
            .collect()
    }

    #[test]
    fn stream_line_format() {
        assert_eq!(format_stream_line(1.23456, 0.5, true, 3), "1.235,0.5000,1,3");
        assert_eq!(format_stream_line(0.0, 0.0, false, 0), "0.000,0.0000,0,0");
    }

    #[test]
    fn body_cam_records_from_start() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1, 0.5, 0.5, 0.5, 0.1]);
        acq.start(0);
        assert!(acq.is_recording());
        assert_eq!(acq.system_status(), SystemStatus::Recording);

        acq.service(400);
        let stats = acq.stats();
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.stored, 5);

        let samples: Vec<&String> = acq
            .live()
            .lines()
            .iter()
            .filter(|l| !l.starts_with(STATUS_PREFIX))
            .collect();
        // Voltages are quantized by the 12-bit ADC
        assert_eq!(samples[0], "0.000,0.0999,0,0");
        assert_eq!(samples[1], "0.100,0.4996,1,1");
        assert_eq!(samples[4], "0.400,0.0999,0,1");
    }

    #[test]
    fn snapshot_waits_for_deadline_while_sampling() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.service(2_000);

        acq.handle_line("snap", 2_000);
        assert!(acq.has_pending_snapshot());
        assert_eq!(acq.pending_deadline_us(), Some(3_000));

        acq.service(2_900);
        assert!(acq.has_pending_snapshot());
        let before = acq.stats().samples;
        assert!(before > 21);

        acq.service(3_000);
        assert!(!acq.has_pending_snapshot());
        let report = acq.last_report().cloned().unwrap();
        // Window is 1000..=3000 at 100 us cadence
        assert_eq!(report.samples, 21);
        assert!(report.streamed);
        assert!(!report.persisted);
        assert_eq!(report.file_name, "snap_00000_0000002000.csv");
        assert!(status_lines(&acq).iter().any(|l| l == "[SEEs] Snap complete"));
    }

    #[test]
    fn second_snap_while_pending_is_ignored() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.handle_line("snap", 500);
        acq.handle_line("SNAP", 600);
        assert_eq!(acq.pending_deadline_us(), Some(1_500));
        assert!(status_lines(&acq)
            .iter()
            .any(|l| l == "[SEEs] Snap already pending, ignoring"));
    }

    #[test]
    fn unknown_and_blank_commands() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.handle_line("", 0);
        acq.handle_line("  \r\n", 0);
        acq.handle_line("launch", 0);
        assert_eq!(status_lines(&acq), vec!["[SEEs] Unknown command: launch"]);
    }

    #[test]
    fn body_cam_ignores_on_off() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.handle_line("off", 100);
        assert!(acq.is_recording());
    }

    #[test]
    fn session_on_off_cycle() {
        let settings = settings(OperatingMode::Session, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.5, 0.1]);
        acq.start(0);
        assert!(!acq.is_recording());
        assert_eq!(acq.system_status(), SystemStatus::Idle);

        // Idle: no samples taken
        acq.service(1_000);
        assert_eq!(acq.stats().samples, 0);

        acq.handle_line("on", 1_000);
        acq.service(1_500);
        assert_eq!(acq.stats().samples, 6);
        assert_eq!(acq.stats().hits, 1);

        acq.handle_line("snap", 1_500);
        acq.handle_line("off", 1_600);
        assert!(!acq.has_pending_snapshot());
        assert!(!acq.is_recording());
        assert_eq!(acq.system_status(), SystemStatus::Idle);
        assert!(acq.indicator().transitions() > 0);
        assert!(!acq.indicator().level());

        // A new session starts from a clean slate
        acq.handle_line("on", 10_000);
        assert_eq!(acq.stats().stored, 0);
        assert_eq!(acq.stats().hits, 0);
    }

    #[test]
    fn snap_while_idle_extracts_immediately() {
        let settings = settings(OperatingMode::Session, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.handle_line("on", 0);
        acq.service(500);
        acq.handle_line("off", 500);

        acq.handle_line("snap", 500);
        assert!(!acq.has_pending_snapshot());
        assert_eq!(acq.last_report().map(|r| r.samples), Some(6));
    }

    #[test]
    fn hit_mode_stores_only_hits() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Hits);
        let trace = [0.1, 0.5, 0.1, 0.1, 0.1, 0.5, 0.1];
        let mut acq = acquisition(&settings, &trace);
        acq.start(0);
        acq.service(600);
        let stats = acq.stats();
        assert_eq!(stats.samples, 7);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.stored, 2);
        assert_eq!(acq.storage_mode(), StorageMode::Hits);
    }

    #[test]
    fn compact_mode_dumps_whole_buffer() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Compact);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.service(900);
        acq.handle_line("snap", 900);
        acq.service(1_900);
        let report = acq.last_report().cloned().unwrap();
        assert_eq!(report.samples, 20);
        assert!(acq
            .live()
            .lines()
            .iter()
            .any(|l| l == "time_ms,voltage_V,hit,total_hits"));
    }

    #[test]
    fn falling_behind_skips_samples() {
        let settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.set_stream_samples(false);
        acq.start(0);
        // One second late at 10 kS/s, catch-up is capped at 1000 samples
        acq.service(1_000_000);
        let stats = acq.stats();
        assert_eq!(stats.samples, 1_000);
        assert_eq!(stats.dropped, 9_001);
        assert_eq!(stats.samples + stats.dropped, 10_001);
    }

    #[test]
    fn invalid_settings_are_rejected_before_sampling() {
        let mut settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        settings.acquisition.sample_rate_hz = 2_000_000;
        assert!(settings.validate().is_err());

        let result = Acquisition::new(
            &settings,
            Trace::volts(&[0.1]),
            UnavailableSink,
            MemoryChannel::default(),
            MockLed::default(),
            0,
        );
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[test]
    fn cadence_holds_at_rate_not_dividing_one_mhz() {
        let mut settings = settings(OperatingMode::BodyCam, StorageMode::Full);
        settings.acquisition.sample_rate_hz = 3_000;
        settings.acquisition.buffer_seconds = 2;
        settings.snapshot.window_seconds = 0.5;
        settings.snapshot.post_trigger_seconds = 0.5;
        let mut acq = acquisition(&settings, &[0.1]);
        acq.set_stream_samples(false);
        acq.start(0);

        let mut now = 0;
        while now <= 1_000_000 {
            acq.service(now);
            now += 1_000;
        }
        // Samples at ceil(k * 1e6 / 3000) us for k = 0..=3000
        assert_eq!(acq.stats().samples, 3_001);

        acq.handle_line("snap", 1_000_000);
        while now <= 1_500_000 {
            acq.service(now);
            now += 1_000;
        }

        let stats = acq.stats();
        assert_eq!(stats.samples, 4_501);
        assert_eq!(stats.dropped, 0);
        // k = 1500..=4500 fall in [500_000, 1_500_000], which is exactly the scratch capacity
        let report = acq.last_report().cloned().unwrap();
        assert_eq!(report.samples, 3_001);
    }

    #[test]
    fn empty_buffer_snap_is_reported() {
        let settings = settings(OperatingMode::Session, StorageMode::Full);
        let mut acq = acquisition(&settings, &[0.1]);
        acq.start(0);
        acq.handle_line("snap", 0);
        assert!(status_lines(&acq)
            .iter()
            .any(|l| l == "[SEEs] Snap failed: Buffer is empty, nothing to capture"));
    }
}
