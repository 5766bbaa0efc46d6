//! Capabilities supplied by the layer that knows what a record means.

use crate::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Read-only window over a record's words (the item header is not part of it).
///
/// Only lives for the duration of a [`Record::record_length`] call.
#[derive(Copy, Clone)]
pub struct RecordView<'a> {
    words: &'a [AtomicU32],
}

impl<'a> RecordView<'a> {
    #[inline]
    pub(crate) fn new(words: &'a [AtomicU32]) -> Self {
        Self { words }
    }

    /// Words reserved for the record.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word `i` of the record, or `None` past the reservation.
    #[inline]
    pub fn word(&self, i: usize) -> Option<u32> {
        self.words.get(i).map(|w| w.load(Ordering::Relaxed))
    }
}

/// Descriptor of a record evicted before the consumer claimed it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Word index of the evicted item.
    pub index: usize,
    /// Record length in words, item header excluded.
    pub len: usize,
    /// First word of the record (its own header), `0` for an empty record.
    pub head: u32,
}

/// Domain capabilities the buffer calls back into.
///
/// Neither method may call back into the buffer.
pub trait Record {
    /// Number of words the freshly written `record` occupies, item header excluded.
    ///
    /// Called once per [`Grant::commit`](crate::Grant::commit), outside the lock. A result shorter
    /// than the reservation trims the record; the default trusts the reservation.
    fn record_length(&self, record: RecordView<'_>) -> usize {
        record.len()
    }

    /// Called once per record evicted in overwrite mode, after the lock is released.
    fn on_drop(&self, dropped: &DroppedRecord) {
        let _ = dropped;
    }
}

impl<T: Record + ?Sized> Record for &T {
    fn record_length(&self, record: RecordView<'_>) -> usize {
        (**self).record_length(record)
    }

    fn on_drop(&self, dropped: &DroppedRecord) {
        (**self).on_drop(dropped)
    }
}

/// Records are exactly as long as their reservation; drops are ignored.
#[derive(Copy, Clone, Debug, Default)]
pub struct ReservedLength;

impl Record for ReservedLength {}

/// Records are exactly as long as their reservation; drops are counted.
#[derive(Debug, Default)]
pub struct DropCounter {
    dropped: AtomicUsize,
}

impl DropCounter {
    pub const fn new() -> Self {
        Self {
            dropped: AtomicUsize::new(0),
        }
    }

    /// Records dropped since creation (or since the last reset).
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reset the counter, returning the previous value.
    #[inline]
    pub fn reset(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl Record for DropCounter {
    fn on_drop(&self, _dropped: &DroppedRecord) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}
