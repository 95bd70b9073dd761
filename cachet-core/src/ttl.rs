//! Time-to-live values for cache writes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a cache entry should live.
///
/// A write without a TTL (`None` at the call site) is stored forever. A TTL
/// that resolves to zero or fewer seconds means the entry is already expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    /// Relative lifetime in whole seconds. May be zero or negative.
    Seconds(i64),
    /// Relative lifetime.
    Duration(Duration),
    /// Absolute expiry instant.
    Until(DateTime<Utc>),
}

impl Ttl {
    /// Remaining lifetime in whole seconds, measured from `now`.
    pub fn seconds_from(&self, now: DateTime<Utc>) -> i64 {
        match self {
            Ttl::Seconds(secs) => *secs,
            Ttl::Duration(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            Ttl::Until(at) => at.signed_duration_since(now).num_seconds(),
        }
    }

    /// Remaining lifetime in whole seconds, measured from the current time.
    pub fn seconds(&self) -> i64 {
        self.seconds_from(Utc::now())
    }

    /// Whether an entry written with this TTL would already be expired.
    pub fn is_expired(&self) -> bool {
        self.seconds() <= 0
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::Duration(d)
    }
}

impl From<DateTime<Utc>> for Ttl {
    fn from(at: DateTime<Utc>) -> Self {
        Ttl::Until(at)
    }
}

impl From<i64> for Ttl {
    fn from(secs: i64) -> Self {
        Ttl::Seconds(secs)
    }
}
