// Retention horizon and the expiry rule

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Default retention horizon: one hour
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Oldest `sent_at` that is still retained at `now`.
///
/// Messages strictly older than the returned instant are expired.
pub fn cutoff_for(now: DateTime<Utc>, horizon: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(horizon)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fixed retention horizon, constant for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    horizon: TimeDelta,
}

impl RetentionPolicy {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon: TimeDelta::from_std(horizon).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn horizon(&self) -> TimeDelta {
        self.horizon
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff_for(now, self.horizon)
    }

    pub fn is_expired(&self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        sent_at < self.cutoff(now)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON)
    }
}
