//! Wall-clock time for lease arithmetic.

use chrono::{DateTime, Duration, Utc};

pub type Timestamp = DateTime<Utc>;

/// Source of wall-clock time for lease arithmetic.
///
/// Leases are compared across processes, so this must be real UTC time
/// (as opposed to a monotonic instant). Tests substitute their own clocks.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Converts a `std` duration into a signed chrono duration, saturating on overflow.
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::milliseconds(i64::MAX))
}
