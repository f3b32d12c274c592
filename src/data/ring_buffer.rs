//! Fixed-capacity ring buffer for body-cam style recording.
//!
//! This module implements the rolling store that sits behind every snapshot. It keeps the last
//! `capacity` records and silently overwrites the oldest one once full, so the instrument always
//! holds the most recent stretch of history without ever growing.
//!
//! # Features
//! - Backing storage reserved once at construction, never resized
//! - O(1) push with overwrite-oldest semantics
//! - Logical indexing (0 = oldest live record) over the physical layout
//! - Optional mutex-guarded wrapper for multi-threaded hosts
//!
//! # Index Layout
//! ```text
//! capacity = 5, after pushing t = 1..=7
//!
//! physical:  [6] [7] [3] [4] [5]
//!                     ^
//!                    head (next write, also the oldest live record)
//!
//! logical:    0 -> 3, 1 -> 4, 2 -> 5, 3 -> 6, 4 -> 7
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::data::record::Timestamped;
use crate::data::window;
use crate::error::{AppResult, DaqError};

/// Fixed-capacity circular store.
///
/// `size` saturates at `capacity` and only goes back down on [`RingBuffer::clear`].
#[derive(Debug)]
pub struct RingBuffer<T> {
    /// Backing storage, always exactly `capacity` slots long.
    slots: Vec<T>,

    /// Next write position. Once full this is also the oldest live record.
    head: usize,

    /// Number of live records, `0..=capacity`.
    size: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocate a ring buffer holding `capacity` records.
    ///
    /// # Returns
    /// - `Err(DaqError::Configuration)` if `capacity` is zero
    /// - `Err(DaqError::Allocation)` if the backing storage cannot be reserved
    ///
    /// # Example
    /// ```
    /// use sees_daq::data::ring_buffer::RingBuffer;
    ///
    /// let mut rb = RingBuffer::<u32>::try_with_capacity(3).unwrap();
    /// for i in 0..5 {
    ///     rb.push(i);
    /// }
    /// assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    /// ```
    pub fn try_with_capacity(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(DaqError::Configuration(
                "Ring buffer capacity must be greater than 0".to_string(),
            ));
        }

        let bytes = capacity.saturating_mul(std::mem::size_of::<T>());
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| DaqError::Allocation { capacity, bytes })?;
        slots.resize(capacity, T::default());

        info!(capacity, kib = bytes / 1024, "Ring buffer allocated");

        Ok(Self {
            slots,
            head: 0,
            size: 0,
        })
    }

    /// Allocate a ring buffer sized for `seconds` of data at `sample_rate_hz`.
    pub fn for_duration(sample_rate_hz: u32, seconds: u32) -> AppResult<Self> {
        let capacity = (sample_rate_hz as usize)
            .checked_mul(seconds as usize)
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "Buffer of {} s at {} Hz overflows the address space",
                    seconds, sample_rate_hz
                ))
            })?;
        Self::try_with_capacity(capacity)
    }

    /// Write a record at the head, overwriting the oldest record when full.
    pub fn push(&mut self, record: T) {
        self.slots[self.head] = record;
        self.head = (self.head + 1) % self.slots.len();
        if self.size < self.slots.len() {
            self.size += 1;
        }
    }
}

impl<T> RingBuffer<T> {
    /// Number of live records.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether no records have been pushed since construction or the last clear.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.size >= self.slots.len()
    }

    /// Forget every record. Memory is not zeroed; stale slots are simply unreachable.
    pub fn clear(&mut self) {
        debug!(dropped = self.size, "Ring buffer cleared");
        self.head = 0;
        self.size = 0;
    }

    /// Translate a logical index (0 = oldest) into a slot index.
    pub fn physical_index(&self, logical: usize) -> usize {
        if self.size < self.slots.len() {
            logical
        } else {
            (self.head + logical) % self.slots.len()
        }
    }

    /// Record at logical index `logical`, if it is live.
    pub fn get(&self, logical: usize) -> Option<&T> {
        if logical < self.size {
            self.slots.get(self.physical_index(logical))
        } else {
            None
        }
    }

    /// Oldest live record.
    pub fn oldest(&self) -> Option<&T> {
        self.get(0)
    }

    /// Most recently pushed record.
    pub fn newest(&self) -> Option<&T> {
        self.size.checked_sub(1).and_then(|last| self.get(last))
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        (0..self.size).map(move |logical| &self.slots[self.physical_index(logical)])
    }
}

impl<T: Timestamped> RingBuffer<T> {
    /// Time covered by the live records in microseconds, 0 with fewer than two records.
    pub fn time_span_us(&self) -> u64 {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) if self.size >= 2 => newest
                .timestamp_us()
                .saturating_sub(oldest.timestamp_us()),
            _ => 0,
        }
    }
}

/// Ring buffer shared between threads.
///
/// A single mutex guards push, extraction and clear, so an extraction always observes a
/// consistent `head`/`size` pair. The acquisition loop itself owns a plain [`RingBuffer`]; this
/// wrapper is for hosts that read the buffer from another thread.
#[derive(Debug)]
pub struct SharedRingBuffer<T> {
    inner: Mutex<RingBuffer<T>>,
}

impl<T: Copy + Default + Timestamped> SharedRingBuffer<T> {
    /// Wrap an existing ring buffer.
    pub fn new(buffer: RingBuffer<T>) -> Self {
        Self {
            inner: Mutex::new(buffer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingBuffer<T>> {
        // A panic while holding the lock cannot leave head/size half-updated, so the data is
        // still usable after poisoning.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a record.
    pub fn push(&self, record: T) {
        self.lock().push(record);
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Extract a time window under the lock. See [`window::extract_window`].
    pub fn extract_window(&self, center_us: u64, half_width_us: u64, out: &mut [T]) -> usize {
        let guard = self.lock();
        window::extract_window(&*guard, center_us, half_width_us, out)
    }

    /// Run `f` with exclusive access to the buffer.
    pub fn with<R>(&self, f: impl FnOnce(&mut RingBuffer<T>) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Stamp(u64);

    impl Timestamped for Stamp {
        fn timestamp_us(&self) -> u64 {
            self.0
        }
    }

    fn contents(rb: &RingBuffer<Stamp>) -> Vec<u64> {
        rb.iter().map(|s| s.0).collect()
    }

    #[test]
    fn test_create_ring_buffer() {
        let rb = RingBuffer::<Stamp>::try_with_capacity(8).unwrap();
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.len(), 0);
        assert!(rb.is_empty());
        assert!(!rb.is_full());
        assert!(rb.oldest().is_none());
        assert!(rb.newest().is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = RingBuffer::<Stamp>::try_with_capacity(0);
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_allocation_failure_reported() {
        let result = RingBuffer::<Stamp>::try_with_capacity(usize::MAX);
        match result {
            Err(err @ DaqError::Allocation { .. }) => assert!(err.is_fatal()),
            other => panic!("expected allocation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_for_duration_capacity() {
        let rb = RingBuffer::<Stamp>::for_duration(1_000, 3).unwrap();
        assert_eq!(rb.capacity(), 3_000);
    }

    #[test]
    fn test_partial_fill_is_identity_mapped() {
        let mut rb = RingBuffer::try_with_capacity(10).unwrap();
        for t in 0..7 {
            rb.push(Stamp(t));
        }
        assert_eq!(rb.len(), 7);
        for i in 0..7 {
            assert_eq!(rb.physical_index(i), i);
            assert_eq!(rb.get(i), Some(&Stamp(i as u64)));
        }
        assert!(rb.get(7).is_none());
    }

    #[test]
    fn test_exact_fill() {
        let mut rb = RingBuffer::try_with_capacity(4).unwrap();
        for t in 0..4 {
            rb.push(Stamp(t));
        }
        assert!(rb.is_full());
        assert_eq!(contents(&rb), vec![0, 1, 2, 3]);
        // head wrapped back to slot 0, which is also the oldest
        assert_eq!(rb.physical_index(0), 0);
    }

    #[test]
    fn test_circular_wrap() {
        let mut rb = RingBuffer::try_with_capacity(5).unwrap();
        for t in 1..=7 {
            rb.push(Stamp(t));
        }
        assert_eq!(rb.len(), 5);
        assert_eq!(contents(&rb), vec![3, 4, 5, 6, 7]);
        assert_eq!(rb.physical_index(0), 2);
        assert_eq!(rb.physical_index(4), 1);
        assert_eq!(rb.oldest(), Some(&Stamp(3)));
        assert_eq!(rb.newest(), Some(&Stamp(7)));
    }

    #[test]
    fn test_many_wraps_keep_last_capacity_records() {
        let capacity = 13;
        let pushes = 1_000u64;
        let mut rb = RingBuffer::try_with_capacity(capacity).unwrap();
        for t in 0..pushes {
            rb.push(Stamp(t));
        }
        assert_eq!(rb.len(), capacity);
        assert_eq!(rb.get(0), Some(&Stamp(pushes - capacity as u64)));
        assert_eq!(rb.get(capacity - 1), Some(&Stamp(pushes - 1)));
        assert!(contents(&rb).windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_clear_after_overfill() {
        let mut rb = RingBuffer::try_with_capacity(3).unwrap();
        for t in 0..5 {
            rb.push(Stamp(t));
        }
        rb.clear();
        assert_eq!(rb.len(), 0);
        assert!(rb.iter().next().is_none());

        rb.push(Stamp(99));
        assert_eq!(rb.len(), 1);
        assert_eq!(rb.get(0), Some(&Stamp(99)));
        assert_eq!(rb.physical_index(0), 0);
    }

    #[test]
    fn test_time_span() {
        let mut rb = RingBuffer::try_with_capacity(3).unwrap();
        assert_eq!(rb.time_span_us(), 0);
        rb.push(Stamp(100));
        assert_eq!(rb.time_span_us(), 0);
        rb.push(Stamp(250));
        assert_eq!(rb.time_span_us(), 150);
        rb.push(Stamp(400));
        rb.push(Stamp(900));
        assert_eq!(rb.time_span_us(), 650);
    }

    #[test]
    fn test_iter_reverse_is_newest_first() {
        let mut rb = RingBuffer::try_with_capacity(3).unwrap();
        for t in 0..4 {
            rb.push(Stamp(t));
        }
        let newest_first: Vec<u64> = rb.iter().rev().map(|s| s.0).collect();
        assert_eq!(newest_first, vec![3, 2, 1]);
        assert_eq!(rb.iter().len(), 3);
    }

    #[test]
    fn test_concurrent_push_extract() {
        let shared = Arc::new(SharedRingBuffer::new(
            RingBuffer::try_with_capacity(64).unwrap(),
        ));

        let writer_rb = Arc::clone(&shared);
        let writer = thread::spawn(move || {
            for t in 0..10_000 {
                writer_rb.push(Stamp(t));
            }
        });

        let reader_rb = Arc::clone(&shared);
        let reader = thread::spawn(move || {
            let mut out = [Stamp::default(); 64];
            for _ in 0..200 {
                let n = reader_rb.extract_window(u64::MAX / 2, u64::MAX / 2, &mut out);
                // Every extraction sees a contiguous, ordered run
                assert!(out[..n].windows(2).all(|w| w[0].0 + 1 == w[1].0));
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(shared.len(), 64);
        assert_eq!(shared.with(|rb| rb.newest().copied()), Some(Stamp(9_999)));

        shared.clear();
        assert!(shared.is_empty());
    }
}
