//! Multi-producer single-consumer packet buffer for no-std logging and event pipelines.
//!
//! # Highlights
//! - Variable-length records in one fixed array of `N` words; no allocation.
//! - Any number of producers, including interrupt handlers; exactly one consumer.
//! - Full-buffer policy per buffer: fail, block until the consumer frees space, or evict the
//!   oldest unclaimed record.
//!
//! # Quick start
//! ```
//! use ph_pbuf::{Config, MpscPbuf, Timeout};
//!
//! let pbuf = MpscPbuf::<64>::new(Config::new().overwrite(true));
//! let mut consumer = pbuf.consumer();
//!
//! let grant = pbuf.alloc(2, Timeout::NoWait).unwrap();
//! grant.write(0, 0xC0FFEE);
//! grant.write(1, 42);
//! grant.commit();
//! pbuf.put_bytes(b"hi").unwrap();
//!
//! let record = consumer.claim().unwrap();
//! assert_eq!((record.word(0), record.word(1)), (0xC0FFEE, 42));
//! record.free();
//! assert!(consumer.drain_one(|r| assert_eq!(r.head(), u32::from_le_bytes(*b"hi\0\0"))));
//! ```
//!
//! # No-std
//! The crate is `#![no_std]`. Locking goes through the `critical-section` crate, so the final
//! binary must provide an implementation; the `std` feature enables the host one together with
//! [`StdSemaphore`]. Tests require `std`.
//!
//! # Safety and concurrency
//! Producers share the buffer by reference. `consumer()` panics if another consumer handle is
//! alive, and a claimed record borrows the consumer, so at most one record is checked out.
//! The crate contains no `unsafe` code.
//!
//! # Semantics
//! - Records are claimed in the order they were reserved; an unpublished reservation at the head
//!   holds back everything behind it.
//! - Usable capacity is `N - 1` words; every item carries a one-word header.
//! - Evicted records are reported through [`Record::on_drop`]; allocation failures are
//!   [`AllocError`] values.
#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
mod fmt;

mod atomic;
pub mod config;
pub mod consumer;
mod cursor;
pub mod error;
mod item;
pub mod pbuf;
pub mod producer;
pub mod record;
pub mod wait;

pub use config::{Config, Timeout};
pub use consumer::{Claimed, Consumer, DrainStats};
pub use error::AllocError;
pub use pbuf::{MpscPbuf, Utilization, WORD_BYTES};
pub use producer::{Grant, USIZE_WORDS};
pub use record::{DropCounter, DroppedRecord, Record, RecordView, ReservedLength};
#[cfg(any(test, feature = "std"))]
pub use wait::StdSemaphore;
pub use wait::{NoWait, Semaphore};
