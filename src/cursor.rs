//! Cursor arithmetic and space accounting over an `N`-word ring.
//!
//! # Layout
//! Walking forward from `rd`:
//! - `[rd, rd_t)` is the record the consumer currently holds (empty when nothing is claimed),
//! - `[rd_t, wr)` is published data and skip padding,
//! - `[wr, wr_t)` is reserved by producers that have not published yet,
//! - `[wr_t, rd)` is free.
//!
//! The word just before `rd` is never reserved, so `wr_t == rd` means empty unless `full` is set.
//! Only overtaking a claimed record sets `full`. `wr` advances by published lengths, so when
//! producers publish out of order it may point into the middle of a pending reservation.

/// `(index + delta) mod N`, with `delta <= N`.
#[inline(always)]
pub(crate) const fn advance<const N: usize>(index: usize, delta: usize) -> usize {
    if N.is_power_of_two() {
        (index + delta) & (N - 1)
    } else {
        let next = index + delta;
        if next >= N { next - N } else { next }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Cursors<const N: usize> {
    pub wr: usize,
    pub wr_t: usize,
    pub rd: usize,
    pub rd_t: usize,
    pub full: bool,
    /// Peak usage in words; only maintained when peak tracking is enabled.
    pub peak: usize,
}

impl<const N: usize> Cursors<N> {
    pub const fn new() -> Self {
        Self {
            wr: 0,
            wr_t: 0,
            rd: 0,
            rd_t: 0,
            full: false,
            peak: 0,
        }
    }

    /// Contiguous free words at `wr_t`, and whether more space follows after wrapping to 0.
    pub fn free_extent(&self) -> (usize, bool) {
        if self.full {
            (0, false)
        } else if self.rd > self.wr_t {
            (self.rd - self.wr_t - 1, false)
        } else if self.rd == 0 {
            (N - 1 - self.wr_t, false)
        } else {
            (N - self.wr_t, true)
        }
    }

    /// Contiguous published words at `rd_t`, and whether more follow after wrapping to 0.
    pub fn occupied_extent(&self) -> (usize, bool) {
        if self.rd_t < self.wr {
            (self.wr - self.rd_t, false)
        } else if self.rd_t > self.wr {
            (N - self.rd_t, true)
        } else if self.full && self.rd == self.rd_t && self.wr == self.wr_t {
            (N - self.rd_t, true)
        } else {
            (0, false)
        }
    }

    /// Words not free for writing.
    pub fn usage(&self) -> usize {
        let free = if self.full {
            0
        } else if self.rd > self.wr_t {
            self.rd - self.wr_t
        } else {
            N - self.wr_t + self.rd
        };
        N - free
    }

    /// Reservation of `len` words at `wr_t`.
    pub fn reserve(&mut self, len: usize) {
        self.wr_t = advance::<N>(self.wr_t, len);
        if self.wr_t == self.rd {
            self.full = true;
        }
    }

    /// Item of `len` words released at `rd`, with `rd_t` following when nothing is claimed.
    pub fn release(&mut self, len: usize) {
        if self.rd == self.rd_t {
            self.rd_t = advance::<N>(self.rd_t, len);
        }
        self.rd = advance::<N>(self.rd, len);
        self.full = false;
    }

    pub fn track_peak(&mut self) {
        let usage = self.usage();
        if usage > self.peak {
            self.peak = usage;
        }
    }
}
