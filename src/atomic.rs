//! Atomic types, sourced from `portable-atomic` on targets that lack native atomics.

#[cfg(not(feature = "portable-atomic"))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
#[cfg(feature = "portable-atomic")]
pub(crate) use portable_atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

pub(crate) const fn atomic_u32_array<const N: usize>() -> [AtomicU32; N] {
    [const { AtomicU32::new(0) }; N]
}
