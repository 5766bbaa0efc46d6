//! Construction-time policy and allocation timeouts.

use core::time::Duration;

/// Buffer policy, fixed at construction. The size is the buffer's `N` parameter.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub(crate) overwrite: bool,
    pub(crate) track_peak: bool,
}

impl Config {
    /// Drop-free, no peak tracking.
    pub const fn new() -> Self {
        Self {
            overwrite: false,
            track_peak: false,
        }
    }

    /// When set, a full buffer evicts its oldest unclaimed record instead of failing or blocking.
    pub const fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    /// When set, the buffer records its peak usage.
    pub const fn track_peak(mut self, enabled: bool) -> Self {
        self.track_peak = enabled;
        self
    }

    pub const fn is_overwrite(&self) -> bool {
        self.overwrite
    }

    pub const fn is_tracking_peak(&self) -> bool {
        self.track_peak
    }
}

/// How long an allocation may wait for the consumer to free space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    #[default]
    NoWait,
    Forever,
    After(Duration),
}

impl Timeout {
    #[inline]
    pub const fn is_no_wait(&self) -> bool {
        match self {
            Timeout::NoWait => true,
            Timeout::Forever => false,
            Timeout::After(d) => d.is_zero(),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::NoWait
        } else {
            Timeout::After(d)
        }
    }
}
