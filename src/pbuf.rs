//! Multi-producer single-consumer packet buffer over `N` fixed words.
//!
//! # Overview
//! - Any number of producers (threads or interrupt handlers) reserve a contiguous item, fill it
//!   and publish it; or use the fused `put_*` calls that do all three under one lock.
//! - One consumer claims the oldest published record, reads it in place, then frees it.
//! - Every item starts with a one-word header (see the `item` module); a record never wraps, the
//!   tail of the array is padded with a skip item instead.
//! - When space runs out a producer either waits for the consumer (blocking mode), fails, or
//!   evicts the oldest unclaimed record (overwrite mode), reporting it through
//!   [`Record::on_drop`].
//!
//! # Locking
//! Cursor and header updates happen inside a `critical-section` critical section, which is safe
//! to enter from interrupt context and never held across a callback. Payload words are only
//! touched outside the lock by their owner: the producer holding the [`Grant`] or the consumer
//! holding the [`Claimed`](crate::Claimed). The critical section orders those accesses relative to
//! publication, so storage words can use relaxed atomics.
//!
//! # Overtaking a claimed record
//! In overwrite mode a producer that finds the consumer's claimed record at the read cursor
//! cannot evict it. It pads the free gap, moves both write cursors past the record and the read
//! cursor beyond it, and marks the buffer full. The item after the claimed record is reclaimed in
//! the same critical section, so the full state is only visible if that item is an unpublished
//! reservation. The claimed bytes sit inside the occupied region, so nothing writes over them;
//! when the consumer frees the record its header becomes a skip marker that is discarded later.
//! An allocation that would have to overtake the same record twice cannot fit beside it and
//! fails with [`AllocError::NoSpace`].
//!
//! Outside that case the word just before the read cursor is never reserved, so at most `N - 1`
//! words are in use.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::atomic::{AtomicBool, AtomicU32, Ordering, atomic_u32_array};
use crate::config::{Config, Timeout};
use crate::cursor::{Cursors, advance};
use crate::error::AllocError;
use crate::item::{Item, MAX_ITEM_WORDS};
use crate::record::{DroppedRecord, Record, ReservedLength};
use crate::wait::{NoWait, Semaphore};

#[cfg(doc)]
use crate::producer::Grant;

/// Size of one storage word in bytes.
pub const WORD_BYTES: usize = core::mem::size_of::<u32>();

/// Current occupancy, in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Utilization {
    /// Usable capacity: `N - 1` words.
    pub capacity_bytes: usize,
    pub used_bytes: usize,
}

/// MPSC packet buffer of `N` words.
///
/// `R` supplies record lengths and drop notifications, `S` lets allocators wait for the
/// consumer.
pub struct MpscPbuf<const N: usize, R = ReservedLength, S = NoWait> {
    state: Mutex<RefCell<Cursors<N>>>,
    words: [AtomicU32; N],
    config: Config,
    record: R,
    semaphore: S,
    consumer_taken: AtomicBool,
}

enum Step {
    Reserved(usize),
    Retry,
    Wait,
    Stalled,
}

enum Eviction {
    Skipped,
    Dropped(DroppedRecord),
    Overtaken(Option<DroppedRecord>),
    Stalled,
}

impl<const N: usize> MpscPbuf<N> {
    /// Buffer that trusts reservation lengths and never blocks.
    pub const fn new(config: Config) -> Self {
        Self::with_parts(ReservedLength, NoWait, config)
    }
}

impl<const N: usize, R, S> MpscPbuf<N, R, S> {
    /// Buffer with a custom record policy and wait strategy.
    ///
    /// `N` must be at least 2; this is checked at compile time.
    pub const fn with_parts(record: R, semaphore: S, config: Config) -> Self {
        const { assert!(N >= 2 && N <= MAX_ITEM_WORDS, "unsupported buffer size") };
        Self {
            state: Mutex::new(RefCell::new(Cursors::new())),
            words: atomic_u32_array::<N>(),
            config,
            record,
            semaphore,
            consumer_taken: AtomicBool::new(false),
        }
    }

    /// Largest item, header included, that can ever be stored.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    #[inline]
    pub const fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn record(&self) -> &R {
        &self.record
    }

    #[inline]
    pub fn semaphore(&self) -> &S {
        &self.semaphore
    }

    /// Capacity and current usage in bytes.
    pub fn utilization(&self) -> Utilization {
        let used = critical_section::with(|cs| self.state.borrow_ref(cs).usage());
        Utilization {
            capacity_bytes: (N - 1) * WORD_BYTES,
            used_bytes: used * WORD_BYTES,
        }
    }

    /// Peak usage in bytes, or `None` when peak tracking is disabled.
    pub fn peak_utilization(&self) -> Option<usize> {
        if !self.config.track_peak {
            return None;
        }
        let peak = critical_section::with(|cs| self.state.borrow_ref(cs).peak);
        Some(peak * WORD_BYTES)
    }

    /// Whether published data is waiting for the consumer.
    pub fn is_pending(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).occupied_extent().0 > 0)
    }

    #[inline]
    pub(crate) fn words(&self, index: usize, len: usize) -> &[AtomicU32] {
        &self.words[index..index + len]
    }

    #[inline]
    pub(crate) fn state(&self) -> &Mutex<RefCell<Cursors<N>>> {
        &self.state
    }

    #[inline]
    pub(crate) fn consumer_flag(&self) -> &AtomicBool {
        &self.consumer_taken
    }

    #[inline]
    pub(crate) fn header(&self, index: usize) -> Item {
        Item::decode(self.words[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_header(&self, index: usize, item: Item) {
        self.words[index].store(item.encode(), Ordering::Relaxed);
    }

    /// Self-published skip item of `len` words at `wr_t`.
    fn pad(&self, cur: &mut Cursors<N>, len: usize) {
        self.set_header(cur.wr_t, Item::Skip { len });
        cur.reserve(len);
        cur.wr = advance::<N>(cur.wr, len);
    }

    /// Publish a filled item of `reserved` words, of which the record uses `used`.
    pub(crate) fn publish(&self, index: usize, reserved: usize, used: usize) {
        debug_assert!(used >= 1 && used <= reserved);
        critical_section::with(|cs| {
            let mut cur = self.state.borrow_ref_mut(cs);
            if used < reserved {
                self.set_header(
                    advance::<N>(index, used),
                    Item::Skip {
                        len: reserved - used,
                    },
                );
            }
            self.set_header(
                index,
                Item::Data {
                    claimed: false,
                    len: used,
                },
            );
            cur.wr = advance::<N>(cur.wr, reserved);
            if self.config.track_peak {
                cur.track_peak();
            }
        });
    }

    /// Reclaim space from the oldest item. Only called with the lock held.
    fn evict(&self, cur: &mut Cursors<N>) -> Eviction {
        let at = cur.rd;
        match self.header(at) {
            Item::Skip { len } => {
                debug_assert_eq!(cur.rd, cur.rd_t);
                cur.release(len);
                Eviction::Skipped
            }
            _ if !self.config.overwrite => Eviction::Stalled,
            Item::Data { claimed: true, len } => {
                let gap = if cur.full {
                    0
                } else if cur.rd > cur.wr_t {
                    cur.rd - cur.wr_t
                } else {
                    N - cur.wr_t
                };
                if gap > 0 {
                    self.pad(cur, gap);
                }
                debug_assert_eq!(cur.wr_t, cur.rd);
                cur.wr_t = advance::<N>(cur.wr_t, len);
                cur.wr = advance::<N>(cur.wr, len);
                if cur.rd == cur.rd_t {
                    cur.rd_t = advance::<N>(cur.rd_t, len);
                }
                cur.rd = cur.rd_t;
                cur.full = true;
                debug!("overtook claimed record at {} ({} words)", at, len);
                match self.evict(cur) {
                    Eviction::Dropped(record) => Eviction::Overtaken(Some(record)),
                    _ => Eviction::Overtaken(None),
                }
            }
            Item::Data {
                claimed: false,
                len,
            } => {
                debug_assert_eq!(cur.rd, cur.rd_t);
                let head = if len > 1 {
                    self.words[at + 1].load(Ordering::Relaxed)
                } else {
                    0
                };
                self.set_header(at, Item::Pending { len });
                cur.release(len);
                debug!("dropped record at {} ({} words)", at, len);
                Eviction::Dropped(DroppedRecord {
                    index: at,
                    len: len - 1,
                    head,
                })
            }
            Item::Pending { .. } => Eviction::Stalled,
        }
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> Cursors<N> {
        critical_section::with(|cs| *self.state.borrow_ref(cs))
    }
}

impl<const N: usize, R: Record, S: Semaphore> MpscPbuf<N, R, S> {
    /// Publish an unused reservation as padding.
    pub(crate) fn abandon(&self, index: usize, reserved: usize) {
        critical_section::with(|cs| {
            let mut cur = self.state.borrow_ref_mut(cs);
            self.set_header(index, Item::Skip { len: reserved });
            cur.wr = advance::<N>(cur.wr, reserved);
        });
        debug!("abandoned {} words at {}", reserved, index);
        // A producer may be waiting on this reservation at the read cursor.
        self.semaphore.give();
    }

    /// Reserve an item of `len` words, header included, and return its index.
    ///
    /// With `fill`, the record words are written and the item published inside the same
    /// critical section as the reservation.
    pub(crate) fn reserve<F>(
        &self,
        len: usize,
        timeout: Timeout,
        mut fill: Option<F>,
    ) -> Result<usize, AllocError>
    where
        F: FnOnce(&[AtomicU32]),
    {
        let capacity = N - 1;
        if len > capacity {
            warn!("item of {} words exceeds capacity of {}", len, capacity);
            return Err(AllocError::Oversize {
                requested: len,
                capacity,
            });
        }
        let may_block =
            !self.config.overwrite && !timeout.is_no_wait() && self.semaphore.can_block();
        let mut expired = false;
        let mut overtook = false;

        loop {
            let mut dropped = None;
            let step = critical_section::with(|cs| {
                let mut cur = self.state.borrow_ref_mut(cs);
                let (free, may_wrap) = cur.free_extent();
                if free >= len {
                    let start = cur.wr_t;
                    match fill.take() {
                        Some(fill) => {
                            fill(&self.words[start + 1..start + len]);
                            self.set_header(
                                start,
                                Item::Data {
                                    claimed: false,
                                    len,
                                },
                            );
                            cur.reserve(len);
                            cur.wr = advance::<N>(cur.wr, len);
                            if self.config.track_peak {
                                cur.track_peak();
                            }
                        }
                        None => {
                            self.set_header(start, Item::Pending { len });
                            cur.reserve(len);
                        }
                    }
                    Step::Reserved(start)
                } else if may_wrap {
                    trace!("padding {} words at {}", free, cur.wr_t);
                    self.pad(&mut cur, free);
                    Step::Retry
                } else {
                    match self.evict(&mut cur) {
                        Eviction::Skipped => Step::Retry,
                        Eviction::Dropped(record) => {
                            dropped = Some(record);
                            Step::Retry
                        }
                        Eviction::Overtaken(record) => {
                            dropped = record;
                            if overtook {
                                Step::Stalled
                            } else {
                                overtook = true;
                                Step::Retry
                            }
                        }
                        Eviction::Stalled if may_block => Step::Wait,
                        Eviction::Stalled => Step::Stalled,
                    }
                }
            });

            if let Some(record) = dropped {
                self.record.on_drop(&record);
            }

            match step {
                Step::Reserved(start) => return Ok(start),
                Step::Retry => {}
                Step::Wait if expired => return Err(AllocError::Timeout),
                Step::Wait => {
                    trace!("waiting for {} words", len);
                    // One more pass after a timeout in case space appeared without a signal.
                    expired = !self.semaphore.take(timeout);
                }
                Step::Stalled => return Err(AllocError::NoSpace),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MpscPbuf, WORD_BYTES};
    use crate::config::{Config, Timeout};
    use crate::error::AllocError;
    use crate::item::Item;
    use crate::record::{DropCounter, DroppedRecord, Record};
    use crate::consumer::Claimed;
    use crate::wait::{NoWait, Semaphore};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::vec;
    use std::vec::Vec;

    #[derive(Default)]
    struct DropLog(Mutex<Vec<DroppedRecord>>);

    impl Record for DropLog {
        fn on_drop(&self, dropped: &DroppedRecord) {
            self.0.lock().unwrap().push(*dropped);
        }
    }

    #[test]
    fn overwrite_drops_oldest_and_wraps_to_zero() {
        let pbuf =
            MpscPbuf::<8, _, _>::with_parts(DropLog::default(), NoWait, Config::new().overwrite(true));

        let a = pbuf.alloc(2, Timeout::NoWait).unwrap();
        a.write(0, 0xA);
        a.commit();
        assert_eq!(pbuf.cursors().wr, 3);

        let b = pbuf.alloc(2, Timeout::NoWait).unwrap();
        b.write(0, 0xB);
        b.commit();
        assert_eq!(pbuf.cursors().wr, 6);
        assert_eq!(pbuf.cursors().free_extent(), (1, false));

        // Dropping the first record frees 0..3, but the word before the reader stays unused,
        // so the second record goes too.
        let c = pbuf.alloc(2, Timeout::NoWait).unwrap();
        assert_eq!(c.index(), 0);
        let drops = pbuf.record().0.lock().unwrap().clone();
        assert_eq!(
            drops,
            [
                DroppedRecord {
                    index: 0,
                    len: 2,
                    head: 0xA,
                },
                DroppedRecord {
                    index: 3,
                    len: 2,
                    head: 0xB,
                },
            ]
        );
        assert_eq!(pbuf.header(6), Item::Skip { len: 2 });
        let cur = pbuf.cursors();
        assert_eq!((cur.rd, cur.wr_t, cur.full), (6, 3, false));
        c.commit();
    }

    #[test]
    fn reserved_unit_survives_a_moving_reader() {
        let pbuf = MpscPbuf::<8>::new(Config::new());
        pbuf.put_bytes(b"abcdefgh").unwrap(); // words 0..3
        pbuf.put_bytes(b"ijklmnop").unwrap(); // words 3..6
        pbuf.consumer().claim().unwrap().free();
        pbuf.put_word(1).unwrap(); // words 6..8
        assert_eq!(pbuf.put_bytes(b"qrstuvwx"), Err(AllocError::NoSpace));
        pbuf.put_word(2).unwrap(); // words 0..2
        assert_eq!(pbuf.put_word(3), Err(AllocError::NoSpace));

        let cur = pbuf.cursors();
        assert_eq!((cur.rd, cur.wr_t, cur.full), (3, 2, false));
        assert_eq!(cur.usage(), 7);
        assert_eq!(pbuf.utilization().used_bytes, 7 * WORD_BYTES);

        let mut held = 0;
        let stats = pbuf.consumer().drain(usize::MAX, |c| held += c.len() + 1);
        assert_eq!((stats.read, held), (3, 7));
    }

    #[test]
    fn non_pow2_ring_pads_and_wraps() {
        let pbuf =
            MpscPbuf::<7, _, _>::with_parts(DropLog::default(), NoWait, Config::new().overwrite(true));
        pbuf.put_bytes(b"aaaabbbb").unwrap(); // words 0..3
        pbuf.put_bytes(b"ccccdddd").unwrap(); // words 3..6
        assert_eq!(pbuf.cursors().free_extent(), (0, false));

        pbuf.put_word(0xE).unwrap();
        assert_eq!(pbuf.header(6), Item::Skip { len: 1 });
        assert_eq!(pbuf.header(0), Item::Data { claimed: false, len: 2 });
        let cur = pbuf.cursors();
        assert_eq!((cur.rd, cur.wr_t, cur.full), (3, 2, false));
        assert_eq!(cur.usage(), 6);

        let drops = pbuf.record().0.lock().unwrap().clone();
        assert_eq!(
            drops,
            [DroppedRecord {
                index: 0,
                len: 2,
                head: u32::from_le_bytes(*b"aaaa"),
            }]
        );

        let mut heads = Vec::new();
        let stats = pbuf.consumer().drain(usize::MAX, |c| heads.push(c.head()));
        assert_eq!(stats.read, 2);
        assert_eq!(heads, [u32::from_le_bytes(*b"cccc"), 0xE]);
        assert!(!pbuf.is_pending());
    }

    #[test]
    fn overwrite_gives_up_rather_than_lapping_a_claimed_record() {
        let pbuf = MpscPbuf::<8>::new(Config::new().overwrite(true));
        pbuf.put_bytes(&[9; 20]).unwrap(); // words 0..6
        let mut consumer = pbuf.consumer();
        let claimed = consumer.claim().unwrap();

        assert_eq!(pbuf.put_word(1), Err(AllocError::NoSpace));
        assert!(pbuf.cursors().usage() <= pbuf.capacity());
        let mut out = [0u8; 20];
        claimed.read_bytes(&mut out);
        assert_eq!(out, [9; 20]);
        claimed.free();

        pbuf.put_word(1).unwrap();
        assert_eq!(consumer.claim().map(|c| c.head()), Some(1));
    }

    #[test]
    fn oversize_is_rejected_up_front() {
        let pbuf = MpscPbuf::<8>::new(Config::new().overwrite(true));
        assert_eq!(
            pbuf.alloc(7, Timeout::NoWait).err(),
            Some(AllocError::Oversize {
                requested: 8,
                capacity: 7,
            })
        );
        assert!(pbuf.alloc(6, Timeout::NoWait).is_ok());
    }

    #[test]
    fn full_non_overwrite_fails_without_moving_cursors() {
        let pbuf = MpscPbuf::<8>::new(Config::new());
        pbuf.put_bytes(b"abcdefgh").unwrap();
        pbuf.put_word(1).unwrap();
        pbuf.put_word(2).unwrap();
        let before = pbuf.cursors();
        assert_eq!(before.free_extent(), (0, false));

        assert_eq!(pbuf.alloc(1, Timeout::NoWait).err(), Some(AllocError::NoSpace));
        assert_eq!(pbuf.alloc(0, Timeout::NoWait).err(), Some(AllocError::NoSpace));
        assert_eq!(pbuf.put_word(3), Err(AllocError::NoSpace));
        assert_eq!(pbuf.cursors(), before);
    }

    #[test]
    fn utilization_reports_bytes_and_peak() {
        let pbuf = MpscPbuf::<16>::new(Config::new().track_peak(true));
        let u = pbuf.utilization();
        assert_eq!(u.capacity_bytes, 15 * WORD_BYTES);
        assert_eq!(u.used_bytes, 0);

        pbuf.put_bytes(&[1; 12]).unwrap();
        pbuf.put_word(7).unwrap();
        assert_eq!(pbuf.utilization().used_bytes, 6 * WORD_BYTES);
        assert_eq!(pbuf.peak_utilization(), Some(6 * WORD_BYTES));

        let mut consumer = pbuf.consumer();
        drop(consumer.claim().unwrap());
        assert_eq!(pbuf.utilization().used_bytes, 2 * WORD_BYTES);
        assert_eq!(pbuf.peak_utilization(), Some(6 * WORD_BYTES));
    }

    #[test]
    fn peak_is_unsupported_unless_enabled() {
        let pbuf = MpscPbuf::<16>::new(Config::new());
        assert_eq!(pbuf.peak_utilization(), None);
    }

    #[test]
    fn overwrite_stalls_behind_an_inflight_reservation() {
        let pbuf = MpscPbuf::<8>::new(Config::new().overwrite(true));
        let pending = pbuf.alloc(5, Timeout::NoWait).unwrap();
        assert_eq!(pbuf.put_word(1), Err(AllocError::NoSpace));
        pending.commit();
        assert_eq!(pbuf.put_word(1), Ok(()));
    }

    #[test]
    fn usage_never_exceeds_capacity() {
        let pbuf = MpscPbuf::<8, _, _>::with_parts(
            DropCounter::new(),
            NoWait,
            Config::new().overwrite(true).track_peak(true),
        );
        for i in 0..50u32 {
            pbuf.put_bytes(&i.to_le_bytes()[..(i as usize % 4) + 1]).unwrap();
            assert!(pbuf.cursors().usage() <= 7);
        }
        assert!(pbuf.record().dropped() > 0);
        assert!(pbuf.peak_utilization().unwrap() <= 7 * WORD_BYTES);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Put(usize),
        Take,
        Hold(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0usize..=12).prop_map(Op::Put),
            2 => Just(Op::Take),
            1 => (0usize..8).prop_map(Op::Hold),
        ]
    }

    /// Sequence number followed by `extra` copies of its low byte.
    fn payload(seq: u32, extra: usize) -> Vec<u8> {
        let mut bytes = seq.to_le_bytes().to_vec();
        bytes.extend(core::iter::repeat_n(seq as u8, extra));
        bytes
    }

    fn check<const N: usize, R: Record, S: Semaphore>(
        claimed: &Claimed<'_, N, R, S>,
        extras: &[usize],
        last: &mut Option<u32>,
    ) -> u32 {
        let seq = claimed.head();
        let expected = payload(seq, extras[seq as usize]);
        let mut out = vec![0u8; claimed.len() * WORD_BYTES];
        claimed.read_bytes(&mut out);
        assert_eq!(&out[..expected.len()], &expected[..]);
        assert!(last.is_none_or(|l| seq > l), "{seq} claimed after {last:?}");
        *last = Some(seq);
        seq
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn overwrite_keeps_order_and_accounts_for_every_record(
            ops in prop::collection::vec(op(), 1..200)
        ) {
            let pbuf = MpscPbuf::<32, _, _>::with_parts(
                DropLog::default(),
                NoWait,
                Config::new().overwrite(true),
            );
            let mut consumer = pbuf.consumer();
            let mut extras = Vec::new();
            let mut claimed = Vec::new();
            let mut last = None;

            for op in ops {
                match op {
                    Op::Put(extra) => {
                        pbuf.put_bytes(&payload(extras.len() as u32, extra)).unwrap();
                        extras.push(extra);
                    }
                    Op::Take => {
                        if let Some(c) = consumer.claim() {
                            claimed.push(check(&c, &extras, &mut last));
                        }
                    }
                    Op::Hold(puts) => {
                        if let Some(c) = consumer.claim() {
                            for _ in 0..puts {
                                pbuf.put_bytes(&payload(extras.len() as u32, 3)).unwrap();
                                extras.push(3);
                            }
                            // Producers may have moved past it, but never wrote over it.
                            claimed.push(check(&c, &extras, &mut last));
                        }
                    }
                }
                prop_assert!(pbuf.cursors().usage() <= pbuf.capacity());
            }
            while let Some(c) = consumer.claim() {
                claimed.push(check(&c, &extras, &mut last));
            }

            let mut seen = claimed.clone();
            seen.extend(pbuf.record().0.lock().unwrap().iter().map(|d| d.head));
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..extras.len() as u32).collect::<Vec<_>>());
            prop_assert!(!pbuf.is_pending());
        }
    }
}
