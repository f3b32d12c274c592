//! Snapshot capture: freeze a window of history around a trigger and ship it out.
//!
//! A snapshot goes to two channels, the live line stream and the persistence sink. It succeeds
//! when at least one of them accepted the data; [`SnapshotReport`] records which ones did. The
//! snapshot counter only advances on success, so file names stay dense.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::acquisition::LiveChannel;
use crate::data::compact::CompactSampleBuffer;
use crate::data::record::SnapshotRecord;
use crate::data::ring_buffer::RingBuffer;
use crate::data::storage::{SnapshotMetadata, SnapshotSink};
use crate::data::window;
use crate::detector::AdcCalibration;
use crate::error::{AppResult, DaqError};

/// Marker line that opens a streamed snapshot.
pub const SNAP_START: &str = "[SNAP_START]";
/// Marker line that closes a streamed snapshot.
pub const SNAP_END: &str = "[SNAP_END]";

/// Outcome of a successful snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Counter value used for this snapshot.
    pub index: u32,
    /// Records in the snapshot.
    pub samples: usize,
    /// File name the snapshot was (or would have been) saved under.
    pub file_name: String,
    /// Where the sink put the file, when it succeeded.
    pub path: Option<PathBuf>,
    /// Whether the persistence sink accepted the data.
    pub persisted: bool,
    /// Whether the live channel accepted the data.
    pub streamed: bool,
}

/// Extracts and delivers snapshots, reusing one scratch buffer for every capture.
#[derive(Debug)]
pub struct SnapshotCoordinator<T> {
    half_width_us: u64,
    scratch: Vec<T>,
    snap_count: u32,
}

impl<T: Copy + Default> SnapshotCoordinator<T> {
    /// Create a coordinator whose scratch buffer holds `scratch_capacity` records.
    ///
    /// The scratch buffer is allocated here, once; a failure is an [`DaqError::Allocation`].
    pub fn try_new(half_width_us: u64, scratch_capacity: usize) -> AppResult<Self> {
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(scratch_capacity).map_err(|_| {
            DaqError::Allocation {
                capacity: scratch_capacity,
                bytes: scratch_capacity.saturating_mul(std::mem::size_of::<T>()),
            }
        })?;
        scratch.resize(scratch_capacity, T::default());

        info!(
            window_s = half_width_us as f64 / 1e6,
            scratch_capacity, "Snapshot coordinator initialized"
        );
        Ok(Self {
            half_width_us,
            scratch,
            snap_count: 0,
        })
    }

    /// Size the scratch buffer for a full window at `max_rate_hz`.
    pub fn for_rate(half_width_us: u64, max_rate_hz: u32) -> AppResult<Self> {
        Self::try_new(half_width_us, scratch_capacity_for(half_width_us, max_rate_hz))
    }
}

/// Worst-case record count in a `±half_width_us` window at `rate_hz`, plus one for the edge.
pub fn scratch_capacity_for(half_width_us: u64, rate_hz: u32) -> usize {
    let span_us = half_width_us.saturating_mul(2);
    let records = span_us.saturating_mul(u64::from(rate_hz)).div_ceil(1_000_000);
    usize::try_from(records.saturating_add(1)).unwrap_or(usize::MAX)
}

/// File name for snapshot `index` triggered at `trigger_us`.
pub fn snapshot_file_name(index: u32, trigger_us: u64) -> String {
    format!("snap_{:05}_{:010}.csv", index, trigger_us)
}

impl<T> SnapshotCoordinator<T> {
    /// Successful snapshots so far.
    pub fn snap_count(&self) -> u32 {
        self.snap_count
    }

    /// Half-width of the extraction window.
    pub fn half_width_us(&self) -> u64 {
        self.half_width_us
    }

    /// Records the scratch buffer can hold.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Dump every sample of a delta-encoded buffer.
    ///
    /// The compact store has no absolute timestamps, so the whole buffer is the snapshot and the
    /// trigger time only names the file.
    pub fn dump_compact(
        &mut self,
        buffer: &CompactSampleBuffer,
        calibration: AdcCalibration,
        trigger_us: u64,
        sink: &mut dyn SnapshotSink,
        live: &mut dyn LiveChannel,
    ) -> AppResult<SnapshotReport> {
        if buffer.is_empty() {
            return Err(DaqError::EmptyBuffer);
        }

        let header = CompactSampleBuffer::HEADER;
        let streamed = stream_rows(live, header, buffer.reconstruct(calibration).map(|s| s.fields()));
        let mut rows = buffer.reconstruct(calibration).map(|s| s.fields());
        self.deliver(
            "compact",
            buffer.len(),
            trigger_us,
            header,
            &mut rows,
            sink,
            streamed,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &mut self,
        record_kind: &str,
        samples: usize,
        trigger_us: u64,
        header: &[&str],
        rows: &mut dyn Iterator<Item = Vec<String>>,
        sink: &mut dyn SnapshotSink,
        streamed: bool,
    ) -> AppResult<SnapshotReport> {
        let index = self.snap_count;
        let file_name = snapshot_file_name(index, trigger_us);

        let path = if sink.is_available() {
            let metadata = SnapshotMetadata {
                snap_index: index,
                trigger_time_us: trigger_us,
                window_seconds: self.half_width_us as f64 / 1e6,
                samples,
                record_kind: record_kind.to_string(),
                captured_at: Utc::now(),
            };
            match sink.write_snapshot(&file_name, &metadata, header, rows) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Snapshot not persisted");
                    None
                }
            }
        } else {
            warn!(file = %file_name, "Storage unavailable, snapshot not persisted");
            None
        };

        let persisted = path.is_some();
        if !persisted && !streamed {
            return Err(DaqError::Storage(format!(
                "Snapshot {} reached neither storage nor the live channel",
                file_name
            )));
        }

        self.snap_count = self.snap_count.saturating_add(1);
        info!(
            index,
            samples, persisted, streamed, file = %file_name, "Snapshot captured"
        );
        Ok(SnapshotReport {
            index,
            samples,
            file_name,
            path,
            persisted,
            streamed,
        })
    }
}

impl<T: SnapshotRecord> SnapshotCoordinator<T> {
    /// Capture the window around `trigger_us` from `store`.
    ///
    /// Fails with [`DaqError::EmptyBuffer`] on an empty store and
    /// [`DaqError::NoSamplesInWindow`] when nothing falls in the window; neither is fatal.
    pub fn capture(
        &mut self,
        store: &RingBuffer<T>,
        trigger_us: u64,
        sink: &mut dyn SnapshotSink,
        live: &mut dyn LiveChannel,
    ) -> AppResult<SnapshotReport> {
        if store.is_empty() {
            return Err(DaqError::EmptyBuffer);
        }

        let count = window::extract_window(store, trigger_us, self.half_width_us, &mut self.scratch);
        debug!(count, trigger_us, "Extracted snapshot window");
        if count == 0 {
            let bounds = window::WindowBounds::around(trigger_us, self.half_width_us);
            return Err(DaqError::NoSamplesInWindow {
                start_us: bounds.start_us,
                end_us: bounds.end_us,
            });
        }
        if count == self.scratch.len() {
            warn!(count, "Snapshot window filled the scratch buffer and may be truncated");
        }

        let records = &self.scratch[..count];
        let streamed = stream_rows(live, T::HEADER, records.iter().map(SnapshotRecord::fields));
        // Rows are copied out so the scratch borrow ends before delivery
        let mut rows = records
            .iter()
            .map(SnapshotRecord::fields)
            .collect::<Vec<_>>()
            .into_iter();
        self.deliver(T::KIND, count, trigger_us, T::HEADER, &mut rows, sink, streamed)
    }
}

fn stream_rows(
    live: &mut dyn LiveChannel,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> bool {
    if !live.is_connected() {
        return false;
    }

    let send = || -> std::io::Result<()> {
        live.send_line(SNAP_START)?;
        live.send_line(&header.join(","))?;
        for row in rows {
            live.send_line(&row.join(","))?;
        }
        live.send_line(SNAP_END)
    };

    match send() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Live channel dropped during snapshot");
            false
        }
    }
}
