//! Consecutive-failure failsafe.
//!
//! Counts fully-failed routes in a row. When the count reaches the
//! configured threshold the guard trips: new executions are refused until
//! the cooldown elapses, and the counter starts again from zero.
//! Any route with at least one successful leg resets the counter.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::types::saturating_add_secs;

#[derive(Debug, Clone, Default)]
pub struct FailsafeGuard {
    consecutive_failures: u32,
    paused_until: Option<DateTime<Utc>>,
    trips: u64,
}

impl FailsafeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Times the guard has tripped since start.
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// End of the current pause, if still active at `now`.
    pub fn paused_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.paused_until.filter(|until| now < *until)
    }

    /// `true` when executions may proceed at `now`. Clears an expired pause.
    pub fn check(&mut self, now: DateTime<Utc>) -> bool {
        match self.paused_until {
            Some(until) if now < until => false,
            Some(_) => {
                info!("Failsafe cooldown elapsed, accepting routes again");
                self.paused_until = None;
                true
            }
            None => true,
        }
    }

    /// Record a finished route. Returns `true` if this result tripped the
    /// guard. A `max_failures` of 0 disables the guard.
    pub fn record(&mut self, success: bool, max_failures: u32, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
        if success {
            self.consecutive_failures = 0;
            return false;
        }

        self.consecutive_failures += 1;
        if max_failures == 0 || self.consecutive_failures < max_failures {
            return false;
        }

        let until = saturating_add_secs(now, cooldown_secs);
        warn!(
            failures = self.consecutive_failures,
            cooldown_secs,
            until = %until,
            "Failsafe tripped, pausing execution"
        );
        self.paused_until = Some(until);
        self.consecutive_failures = 0;
        self.trips += 1;
        true
    }
}
