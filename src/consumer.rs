//! Consumer side: claim the oldest published record, read it in place, free it.
//!
//! There is exactly one [`Consumer`] per buffer at a time, and a [`Claimed`] record mutably
//! borrows it, so at most one record is checked out. Dropping a `Claimed` frees it.

use core::marker::PhantomData;

use crate::atomic::Ordering;
use crate::cursor::advance;
use crate::item::Item;
use crate::pbuf::MpscPbuf;
use crate::record::Record;
use crate::wait::Semaphore;

#[must_use]
#[derive(Copy, Clone, Debug)]
pub struct DrainStats {
    pub read: usize,
}

impl<const N: usize, R: Record, S: Semaphore> MpscPbuf<N, R, S> {
    /// Create the consumer handle.
    ///
    /// # Panics
    /// If another consumer handle is alive.
    pub fn consumer(&self) -> Consumer<'_, N, R, S> {
        match self.try_consumer() {
            Some(consumer) => consumer,
            None => panic!("MpscPbuf already has an active consumer"),
        }
    }

    /// Create the consumer handle, or `None` if another one is alive.
    pub fn try_consumer(&self) -> Option<Consumer<'_, N, R, S>> {
        if self.consumer_flag().swap(true, Ordering::Acquire) {
            None
        } else {
            Some(Consumer { pbuf: self })
        }
    }

    /// Mark the oldest published record claimed; returns `(index, len)` of its item.
    fn claim_next(&self) -> Option<(usize, usize)> {
        let mut released = false;
        loop {
            let claimed = critical_section::with(|cs| {
                let mut cur = self.state().borrow_ref_mut(cs);
                if cur.occupied_extent().0 == 0 {
                    return Some(None);
                }
                let at = cur.rd_t;
                match self.header(at) {
                    Item::Skip { len } => {
                        debug_assert_eq!(cur.rd, cur.rd_t);
                        cur.release(len);
                        released = true;
                        None
                    }
                    Item::Data {
                        claimed: false,
                        len,
                    } => {
                        self.set_header(at, Item::Data { claimed: true, len });
                        cur.rd_t = advance::<N>(at, len);
                        Some(Some((at, len)))
                    }
                    // A reservation at the head that has not been published yet.
                    Item::Pending { .. } => Some(None),
                    Item::Data { claimed: true, .. } => {
                        debug_assert!(false, "record at {} claimed twice", at);
                        Some(None)
                    }
                }
            });
            if let Some(claimed) = claimed {
                if let Some((index, len)) = claimed {
                    trace!("claimed {} words at {}", len, index);
                }
                if released {
                    self.semaphore().give();
                }
                return claimed;
            }
        }
    }

    fn free_claimed(&self, index: usize, len: usize) {
        critical_section::with(|cs| {
            let mut cur = self.state().borrow_ref_mut(cs);
            debug_assert_eq!(self.header(index).len(), len);
            if index == cur.rd {
                self.set_header(index, Item::Pending { len });
                cur.release(len);
            } else {
                // A producer moved past the record while it was claimed; leave padding behind.
                self.set_header(index, Item::Skip { len });
                debug!("freed overtaken record at {} ({} words)", index, len);
            }
        });
        self.semaphore().give();
    }
}

/// The single reader of an [`MpscPbuf`].
pub struct Consumer<'a, const N: usize, R, S> {
    pbuf: &'a MpscPbuf<N, R, S>,
}

impl<'a, const N: usize, R: Record, S: Semaphore> Consumer<'a, N, R, S> {
    /// Claim the oldest published record, or `None` if there is none (or the oldest reservation
    /// has not been published yet). Never blocks.
    pub fn claim(&mut self) -> Option<Claimed<'_, N, R, S>> {
        let pbuf = self.pbuf;
        let (index, len) = pbuf.claim_next()?;
        Some(Claimed {
            pbuf,
            index,
            len,
            _consumer: PhantomData,
        })
    }

    /// Whether published data is waiting.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pbuf.is_pending()
    }

    /// Claim at most one record, hand it to `hook`, and free it.
    /// Returns true if a record was delivered.
    #[inline]
    pub fn drain_one(&mut self, hook: impl FnOnce(&Claimed<'_, N, R, S>)) -> bool {
        let mut hook = Some(hook);
        let stats = self.drain(1, |claimed| {
            if let Some(hook) = hook.take() {
                hook(claimed);
            }
        });
        stats.read == 1
    }

    /// Claim, hand to `hook` and free up to `max` records, in order.
    pub fn drain(&mut self, max: usize, mut hook: impl FnMut(&Claimed<'_, N, R, S>)) -> DrainStats {
        let mut read = 0usize;
        while read < max {
            let Some(claimed) = self.claim() else {
                break;
            };
            hook(&claimed);
            read += 1;
        }
        DrainStats { read }
    }
}

impl<const N: usize, R, S> Drop for Consumer<'_, N, R, S> {
    fn drop(&mut self) {
        self.pbuf.consumer_flag().store(false, Ordering::Release);
    }
}

/// A record checked out by the consumer. Freed on drop.
pub struct Claimed<'a, const N: usize, R: Record, S: Semaphore> {
    pbuf: &'a MpscPbuf<N, R, S>,
    index: usize,
    len: usize,
    _consumer: PhantomData<&'a mut ()>,
}

impl<'a, const N: usize, R: Record, S: Semaphore> Claimed<'a, N, R, S> {
    #[inline]
    fn record(&self) -> &'a [crate::atomic::AtomicU32] {
        self.pbuf.words(self.index + 1, self.len - 1)
    }

    /// Word index of the item in the buffer.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Record length in words.
    #[inline]
    pub fn len(&self) -> usize {
        self.len - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 1
    }

    /// First record word, `0` for an empty record.
    #[inline]
    pub fn head(&self) -> u32 {
        self.get(0).unwrap_or(0)
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<u32> {
        self.record().get(i).map(|w| w.load(Ordering::Relaxed))
    }

    /// # Panics
    /// If `i >= self.len()`.
    #[inline]
    pub fn word(&self, i: usize) -> u32 {
        self.record()[i].load(Ordering::Relaxed)
    }

    /// Pointer-sized value stored at word `i` (low word first).
    ///
    /// # Panics
    /// If the value extends past the record.
    pub fn usize_at(&self, i: usize) -> usize {
        let words = &self.record()[i..i + crate::producer::USIZE_WORDS];
        let mut value = 0u64;
        for (n, w) in words.iter().enumerate() {
            value |= u64::from(w.load(Ordering::Relaxed)) << (32 * n);
        }
        value as usize
    }

    /// Copy the record into `dst`; returns the words copied.
    pub fn copy_to_slice(&self, dst: &mut [u32]) -> usize {
        let mut n = 0;
        for (d, w) in dst.iter_mut().zip(self.record()) {
            *d = w.load(Ordering::Relaxed);
            n += 1;
        }
        n
    }

    /// Copy the record as little-endian bytes into `dst`; returns the bytes copied.
    pub fn read_bytes(&self, dst: &mut [u8]) -> usize {
        let mut n = 0;
        for (chunk, w) in dst.chunks_mut(4).zip(self.record()) {
            let bytes = w.load(Ordering::Relaxed).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
            n += chunk.len();
        }
        n
    }

    /// Release the record back to producers.
    #[inline]
    pub fn free(self) {}
}

impl<const N: usize, R: Record, S: Semaphore> Drop for Claimed<'_, N, R, S> {
    fn drop(&mut self) {
        self.pbuf.free_claimed(self.index, self.len);
    }
}
