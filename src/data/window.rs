//! Time-window extraction from a [`RingBuffer`].
//!
//! A snapshot asks for every record within `half_width` of a trigger instant. Two strategies are
//! provided with the same contract:
//!
//! - [`extract_window`] walks the logical sequence oldest to newest. It makes no assumption about
//!   ordering and is what the acquisition loop uses.
//! - [`extract_window_sorted`] binary-searches the first record at or after the window start.
//!   Timestamps are monotonic within the buffer, so this gives the same result in `O(log n + k)`.
//!
//! Both copy into caller-provided storage and never write more than `out.len()` records.

use crate::data::record::Timestamped;
use crate::data::ring_buffer::RingBuffer;

/// Inclusive time bounds of an extraction window, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    /// First timestamp included.
    pub start_us: u64,
    /// Last timestamp included.
    pub end_us: u64,
}

impl WindowBounds {
    /// Bounds of `center ± half_width`, clamped to the `u64` range instead of wrapping.
    pub fn around(center_us: u64, half_width_us: u64) -> Self {
        Self {
            start_us: center_us.saturating_sub(half_width_us),
            end_us: center_us.saturating_add(half_width_us),
        }
    }

    /// Whether `timestamp_us` falls inside the window.
    pub fn contains(&self, timestamp_us: u64) -> bool {
        (self.start_us..=self.end_us).contains(&timestamp_us)
    }
}

/// Copy records with timestamps in `[center − half_width, center + half_width]` into `out`.
///
/// Returns the number of records copied. An empty store or an empty window yields 0; that is a
/// legitimate "nothing happened" result, not an error.
pub fn extract_window<T>(
    store: &RingBuffer<T>,
    center_us: u64,
    half_width_us: u64,
    out: &mut [T],
) -> usize
where
    T: Timestamped + Copy,
{
    let bounds = WindowBounds::around(center_us, half_width_us);
    let mut extracted = 0;

    for record in store.iter() {
        if extracted >= out.len() {
            break;
        }
        if bounds.contains(record.timestamp_us()) {
            out[extracted] = *record;
            extracted += 1;
        }
    }

    extracted
}

/// Same contract as [`extract_window`], using a binary search for the window start.
///
/// Requires timestamps to be non-decreasing from oldest to newest, which holds for everything the
/// acquisition loop records.
pub fn extract_window_sorted<T>(
    store: &RingBuffer<T>,
    center_us: u64,
    half_width_us: u64,
    out: &mut [T],
) -> usize
where
    T: Timestamped + Copy,
{
    let bounds = WindowBounds::around(center_us, half_width_us);
    let first = first_at_or_after(store, bounds.start_us);

    let mut extracted = 0;
    for record in store.iter().skip(first) {
        if extracted >= out.len() || record.timestamp_us() > bounds.end_us {
            break;
        }
        out[extracted] = *record;
        extracted += 1;
    }

    extracted
}

/// Logical index of the first record with `timestamp >= target`, or `store.len()` if none.
fn first_at_or_after<T: Timestamped>(store: &RingBuffer<T>, target_us: u64) -> usize {
    let (mut lo, mut hi) = (0, store.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match store.get(mid) {
            Some(record) if record.timestamp_us() < target_us => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}
