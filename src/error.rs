//! Allocation failures.
//!
//! A full buffer and a timed-out wait are ordinary steady-state outcomes, returned as values.
//! Records evicted in overwrite mode are not errors; they are reported through
//! [`Record::on_drop`](crate::Record::on_drop).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The item can never fit, whatever the consumer does.
    #[error("item of {requested} words exceeds capacity of {capacity} words")]
    Oversize { requested: usize, capacity: usize },
    /// A blocking allocation waited out its timeout.
    #[error("timed out waiting for free space")]
    Timeout,
    /// No space, and nothing could be evicted.
    #[error("no free space")]
    NoSpace,
}

#[cfg(feature = "defmt")]
impl defmt::Format for AllocError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Oversize {
                requested,
                capacity,
            } => defmt::write!(f, "Oversize({=usize} > {=usize})", requested, capacity),
            Self::Timeout => defmt::write!(f, "Timeout"),
            Self::NoSpace => defmt::write!(f, "NoSpace"),
        }
    }
}
