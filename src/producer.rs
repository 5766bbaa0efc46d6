//! Producer side: reserve-fill-commit through a [`Grant`], or one-shot `put_*` calls.
//!
//! Producers share the buffer by reference; any number may run concurrently, including from
//! interrupt handlers (pair such buffers with [`NoWait`](crate::NoWait) or a semaphore whose
//! `can_block` reports `false` in interrupt context).

use core::mem;

use crate::atomic::{AtomicU32, Ordering};
use crate::config::Timeout;
use crate::error::AllocError;
use crate::pbuf::MpscPbuf;
use crate::record::{Record, RecordView};
use crate::wait::Semaphore;

/// Words needed to store a `usize`.
pub const USIZE_WORDS: usize = mem::size_of::<usize>().div_ceil(mem::size_of::<u32>());

#[inline]
fn pack_word(chunk: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(bytes)
}

#[inline]
fn store_bytes(words: &[AtomicU32], bytes: &[u8]) -> usize {
    let mut written = 0;
    for (word, chunk) in words.iter().zip(bytes.chunks(4)) {
        word.store(pack_word(chunk), Ordering::Relaxed);
        written += chunk.len();
    }
    written
}

#[inline]
fn store_usize(words: &[AtomicU32], value: usize) {
    for (i, word) in words.iter().take(USIZE_WORDS).enumerate() {
        word.store(((value as u64) >> (32 * i)) as u32, Ordering::Relaxed);
    }
}

impl<const N: usize, R: Record, S: Semaphore> MpscPbuf<N, R, S> {
    /// Reserve a record of `words` words.
    ///
    /// Waits up to `timeout` for the consumer when the buffer is full, overwrite is disabled and
    /// the semaphore allows blocking; in overwrite mode the oldest unclaimed records are evicted
    /// instead.
    ///
    /// # Errors
    /// - [`AllocError::Oversize`] if the record can never fit.
    /// - [`AllocError::Timeout`] if the wait expired.
    /// - [`AllocError::NoSpace`] if the buffer is full and nothing could be evicted.
    pub fn alloc(&self, words: usize, timeout: Timeout) -> Result<Grant<'_, N, R, S>, AllocError> {
        let len = words.saturating_add(1);
        let index = self.reserve(len, timeout, None::<fn(&[AtomicU32])>)?;
        Ok(Grant {
            pbuf: self,
            index,
            len,
        })
    }

    /// Publish a one-word record.
    pub fn put_word(&self, word: u32) -> Result<(), AllocError> {
        self.reserve(
            2,
            Timeout::NoWait,
            Some(|w: &[AtomicU32]| w[0].store(word, Ordering::Relaxed)),
        )
        .map(drop)
    }

    /// Publish a record of one word followed by a pointer-sized value (low word first).
    pub fn put_word_and_pointer(&self, word: u32, ptr: usize) -> Result<(), AllocError> {
        self.reserve(
            2 + USIZE_WORDS,
            Timeout::NoWait,
            Some(|w: &[AtomicU32]| {
                w[0].store(word, Ordering::Relaxed);
                store_usize(&w[1..], ptr);
            }),
        )
        .map(drop)
    }

    /// Publish `bytes` as a record, little-endian packed and zero padded to whole words.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<(), AllocError> {
        self.reserve(
            1 + bytes.len().div_ceil(4),
            Timeout::NoWait,
            Some(|w: &[AtomicU32]| {
                store_bytes(w, bytes);
            }),
        )
        .map(drop)
    }
}

/// Exclusive write access to a reserved record.
///
/// Nothing is visible to the consumer until [`commit`](Grant::commit). Dropping a grant without
/// committing publishes its space as padding.
pub struct Grant<'a, const N: usize, R: Record, S: Semaphore> {
    pbuf: &'a MpscPbuf<N, R, S>,
    index: usize,
    len: usize,
}

impl<'a, const N: usize, R: Record, S: Semaphore> Grant<'a, N, R, S> {
    #[inline]
    fn record(&self) -> &'a [AtomicU32] {
        self.pbuf.words(self.index + 1, self.len - 1)
    }

    /// Word index of the item in the buffer.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Record words reserved.
    #[inline]
    pub fn len(&self) -> usize {
        self.len - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 1
    }

    /// # Panics
    /// If `i >= self.len()`.
    #[inline]
    pub fn write(&self, i: usize, word: u32) {
        self.record()[i].store(word, Ordering::Relaxed);
    }

    /// # Panics
    /// If `i >= self.len()`.
    #[inline]
    pub fn read(&self, i: usize) -> u32 {
        self.record()[i].load(Ordering::Relaxed)
    }

    /// Copy `src` to the start of the record; returns the words written.
    pub fn write_slice(&self, src: &[u32]) -> usize {
        let record = self.record();
        let n = src.len().min(record.len());
        for (dst, &w) in record.iter().zip(&src[..n]) {
            dst.store(w, Ordering::Relaxed);
        }
        n
    }

    /// Pack `bytes` little-endian into the record; returns the bytes written.
    pub fn write_bytes(&self, bytes: &[u8]) -> usize {
        store_bytes(self.record(), bytes)
    }

    /// Publish the record at the length reported by [`Record::record_length`].
    pub fn commit(self) {
        let reserved = self.len - 1;
        let reported = self
            .pbuf
            .record()
            .record_length(RecordView::new(self.record()));
        let used = if reported == 0 || reported > reserved {
            reserved
        } else {
            reported
        };
        self.pbuf.publish(self.index, self.len, used + 1);
        mem::forget(self);
    }
}

impl<const N: usize, R: Record, S: Semaphore> Drop for Grant<'_, N, R, S> {
    fn drop(&mut self) {
        self.pbuf.abandon(self.index, self.len);
    }
}
