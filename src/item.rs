//! Item header: the first word of every item in the ring.
//!
//! Bit 0 is `VALID`, bit 1 is `BUSY`, bits 2..32 hold the item length in words, header included.
//! Committed data has `VALID`; a claimed record additionally has `BUSY`; a skip marker has `BUSY`
//! without `VALID`. A header with neither bit is a reservation still being written (or an item
//! that has already been released).

const VALID: u32 = 1 << 0;
const BUSY: u32 = 1 << 1;
const LEN_SHIFT: u32 = 2;

/// Longest item a header can describe.
pub(crate) const MAX_ITEM_WORDS: usize = (u32::MAX >> LEN_SHIFT) as usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Item {
    Pending { len: usize },
    Data { claimed: bool, len: usize },
    Skip { len: usize },
}

impl Item {
    #[inline]
    pub fn len(self) -> usize {
        match self {
            Item::Pending { len } | Item::Data { len, .. } | Item::Skip { len } => len,
        }
    }

    #[inline]
    pub fn encode(self) -> u32 {
        let (flags, len) = match self {
            Item::Pending { len } => (0, len),
            Item::Data {
                claimed: false,
                len,
            } => (VALID, len),
            Item::Data { claimed: true, len } => (VALID | BUSY, len),
            Item::Skip { len } => (BUSY, len),
        };
        debug_assert!(len <= MAX_ITEM_WORDS);
        ((len as u32) << LEN_SHIFT) | flags
    }

    #[inline]
    pub fn decode(word: u32) -> Self {
        let len = (word >> LEN_SHIFT) as usize;
        match (word & VALID != 0, word & BUSY != 0) {
            (false, false) => Item::Pending { len },
            (true, claimed) => Item::Data { claimed, len },
            (false, true) => Item::Skip { len },
        }
    }
}
