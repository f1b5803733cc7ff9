use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// A logical DTN timestamp in seconds.
///
/// Bundle creation times and expiry decisions are expressed in this clock,
/// which is delivered by the daemon's time subsystem. It is *not* read from
/// the wall clock by the storage engine, so simulated and virtual-time
/// deployments get deterministic behavior.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DtnTime(u64);

impl DtnTime {
    /// The zero timestamp.
    pub const ZERO: DtnTime = DtnTime(0);

    /// Create a timestamp from raw seconds.
    pub const fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Raw seconds value.
    pub const fn seconds(&self) -> u64 {
        self.0
    }

    /// Add a number of seconds, saturating at the maximum.
    pub const fn saturating_add(&self, seconds: u64) -> Self {
        Self(self.0.saturating_add(seconds))
    }
}

impl From<u64> for DtnTime {
    fn from(seconds: u64) -> Self {
        Self(seconds)
    }
}

impl Add<u64> for DtnTime {
    type Output = DtnTime;

    fn add(self, seconds: u64) -> DtnTime {
        DtnTime(self.0.saturating_add(seconds))
    }
}

impl fmt::Display for DtnTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DtnTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DtnTime({}s)", self.0)
    }
}
