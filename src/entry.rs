//! In-memory schedule entry wrapping a persisted task
//!
//! A [`ScheduleEntry`] pairs a [`PeriodicTask`] row with its resolved
//! [`Schedule`] value and answers due-time queries for the loop. The entry
//! holds the effective previous fire time in UTC; a task that has never
//! run uses the moment the entry was constructed, so a freshly loaded
//! interval task waits one full interval before its first fire.

use crate::schedule::{local_to_utc, utc_to_local, DueState, Schedule};
use crate::types::{PeriodicTask, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

/// Seconds until a disabled entry is looked at again.
pub const DISABLED_RECHECK_SECS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub task: PeriodicTask,
    pub schedule: Schedule,
    /// Effective previous fire time in UTC
    last_run: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Build an entry. `now` is the construction time, used as the
    /// effective previous fire when the task has never run.
    pub fn new(
        task: PeriodicTask,
        schedule: Schedule,
        tz: FixedOffset,
        now: DateTime<Utc>,
    ) -> Self {
        let last_run = task
            .last_run_at
            .map(|t| local_to_utc(t, tz))
            .unwrap_or(now);
        Self {
            task,
            schedule,
            last_run,
        }
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn last_run(&self) -> DateTime<Utc> {
        self.last_run
    }

    /// Whether the entry should fire at `now`.
    ///
    /// Disabled entries are never due and are rechecked on a fixed
    /// cadence. An entry with a future `start_at` stays quiet until the
    /// gate passes, then delegates to its schedule.
    pub fn is_due(&self, now: DateTime<Utc>, tz: FixedOffset) -> Result<DueState> {
        if !self.task.enabled {
            return Ok(DueState::not_due(DISABLED_RECHECK_SECS));
        }
        if let Some(start_at) = self.task.start_at {
            let start = local_to_utc(start_at, tz);
            if now < start {
                let until_start = (start - now).num_milliseconds() as f64 / 1_000.0;
                return Ok(DueState::not_due(until_start));
            }
        }
        self.schedule.is_due(self.last_run, now, tz)
    }

    /// Record a fire in memory, returning the local-naive timestamp to
    /// persist. The revision clock is never bumped for this write.
    pub fn advance(&mut self, now: DateTime<Utc>, tz: FixedOffset) -> NaiveDateTime {
        let fired_local = utc_to_local(now, tz);
        self.task.last_run_at = Some(fired_local);
        self.task.total_run_count += 1;
        self.last_run = now;
        fired_local
    }

    /// True when the stored row differs from this entry in any field the
    /// scheduler does not own. Used to decide whether an external edit
    /// should replace the in-memory entry.
    pub fn matches_definition(&self, stored: &PeriodicTask) -> bool {
        self.task.id == stored.id
            && self.task.task == stored.task
            && self.task.args == stored.args
            && self.task.kwargs == stored.kwargs
            && self.task.schedule == stored.schedule
            && self.task.enabled == stored.enabled
            && self.task.start_at == stored.start_at
            && self.task.options == stored.options
    }
}
