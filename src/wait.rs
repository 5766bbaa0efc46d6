//! Counting semaphore seam used by blocking allocators.
//!
//! Every free gives the semaphore exactly once, waking at most one waiter. Claims that consume
//! padding and abandoned grants give it too. Allocators only wait
//! when [`Semaphore::can_block`] says the calling context may suspend.

use crate::config::Timeout;

pub trait Semaphore {
    /// Release one unit, waking at most one waiter.
    fn give(&self);

    /// Take one unit, waiting up to `timeout`. Returns `false` on timeout.
    fn take(&self, timeout: Timeout) -> bool;

    /// Whether the calling context may suspend (e.g. `false` inside an interrupt handler).
    fn can_block(&self) -> bool {
        true
    }
}

/// Never blocks; allocations that would wait fail instead.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoWait;

impl Semaphore for NoWait {
    #[inline]
    fn give(&self) {}

    #[inline]
    fn take(&self, _timeout: Timeout) -> bool {
        false
    }

    #[inline]
    fn can_block(&self) -> bool {
        false
    }
}

#[cfg(any(test, feature = "std"))]
pub use self::std_impl::StdSemaphore;

#[cfg(any(test, feature = "std"))]
mod std_impl {
    use super::Semaphore;
    use crate::config::Timeout;
    use std::sync::{Condvar, Mutex, PoisonError};

    /// Mutex + condvar counting semaphore.
    ///
    /// [`new`](Self::new) caps the count at one; [`with_limit`](Self::with_limit) allows more.
    #[derive(Debug)]
    pub struct StdSemaphore {
        count: Mutex<usize>,
        limit: usize,
        cond: Condvar,
    }

    impl StdSemaphore {
        /// Binary semaphore, starting at zero.
        pub const fn new() -> Self {
            Self::with_limit(1)
        }

        /// Count saturates at `limit` gives.
        pub const fn with_limit(limit: usize) -> Self {
            Self {
                count: Mutex::new(0),
                limit,
                cond: Condvar::new(),
            }
        }

        pub fn available(&self) -> usize {
            *self.count.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Default for StdSemaphore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Semaphore for StdSemaphore {
        fn give(&self) {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            if *count < self.limit {
                *count += 1;
            }
            self.cond.notify_one();
        }

        fn take(&self, timeout: Timeout) -> bool {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            match timeout {
                Timeout::NoWait => {}
                Timeout::Forever => {
                    while *count == 0 {
                        count = self.cond.wait(count).unwrap_or_else(PoisonError::into_inner);
                    }
                }
                Timeout::After(d) => {
                    count = self
                        .cond
                        .wait_timeout_while(count, d, |c| *c == 0)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
            if *count > 0 {
                *count -= 1;
                true
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NoWait, Semaphore, StdSemaphore};
    use crate::config::Timeout;
    use core::time::Duration;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn no_wait_never_blocks() {
        NoWait.give();
        assert!(!NoWait.can_block());
        assert!(!NoWait.take(Timeout::Forever));
    }

    #[test]
    fn take_times_out_without_a_give() {
        let sem = StdSemaphore::new();
        assert!(!sem.take(Timeout::NoWait));
        assert!(!sem.take(Timeout::After(Duration::from_millis(5))));
    }

    #[test]
    fn gives_are_counted_up_to_the_limit() {
        let sem = StdSemaphore::with_limit(1);
        sem.give();
        sem.give();
        assert_eq!(sem.available(), 1);
        assert!(sem.take(Timeout::NoWait));
        assert!(!sem.take(Timeout::NoWait));
    }

    #[test]
    fn default_count_saturates_at_one() {
        let sem = StdSemaphore::default();
        for _ in 0..10 {
            sem.give();
        }
        assert_eq!(sem.available(), 1);
        assert!(sem.take(Timeout::NoWait));
        assert!(!sem.take(Timeout::After(Duration::from_millis(5))));
    }

    #[test]
    fn give_wakes_a_waiter() {
        let sem = Arc::new(StdSemaphore::new());
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.take(Timeout::Forever))
        };
        thread::sleep(Duration::from_millis(10));
        sem.give();
        assert!(waiter.join().unwrap());
        assert_eq!(sem.available(), 0);
    }
}
