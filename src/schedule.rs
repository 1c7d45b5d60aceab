//! Schedule value types and due-time computation
//!
//! A [`Schedule`] describes *when* a task runs: a crontab pattern, a fixed
//! interval, or a solar event. Given the time of the previous fire and the
//! current time, every variant answers "is this due now, and if not, how
//! long until it might be" as a [`DueState`].
//!
//! `last_run_at` is naive UTC throughout; conversion to and from the
//! configured local timezone happens only at the schedule-entry boundary.

use crate::parser::Crontab;
use crate::solar::Solar;
use crate::types::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Answer to a due-time query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueState {
    /// The schedule indicates the task should fire now
    pub is_due: bool,
    /// Seconds until the next time the answer might change
    pub next_check_secs: f64,
}

impl DueState {
    pub fn due(next_check_secs: f64) -> Self {
        Self {
            is_due: true,
            next_check_secs: next_check_secs.max(0.0),
        }
    }

    pub fn not_due(next_check_secs: f64) -> Self {
        Self {
            is_due: false,
            next_check_secs: next_check_secs.max(0.0),
        }
    }
}

/// Units for a fixed-interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalPeriod {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalPeriod {
    /// The canonical identifier, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalPeriod::Seconds => "seconds",
            IntervalPeriod::Minutes => "minutes",
            IntervalPeriod::Hours => "hours",
            IntervalPeriod::Days => "days",
        }
    }

    /// Parse a stored identifier.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "seconds" => Ok(IntervalPeriod::Seconds),
            "minutes" => Ok(IntervalPeriod::Minutes),
            "hours" => Ok(IntervalPeriod::Hours),
            "days" => Ok(IntervalPeriod::Days),
            other => Err(crate::types::BeatError::Config(format!(
                "unrecognized interval period '{other}'"
            ))),
        }
    }

    fn multiplier(self) -> f64 {
        match self {
            IntervalPeriod::Seconds => 1.0,
            IntervalPeriod::Minutes => 60.0,
            IntervalPeriod::Hours => 3_600.0,
            IntervalPeriod::Days => 86_400.0,
        }
    }
}

impl std::fmt::Display for IntervalPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedule executing every `every` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub every: u64,
    pub period: IntervalPeriod,
}

impl Interval {
    pub fn new(every: u64, period: IntervalPeriod) -> Self {
        Self { every, period }
    }

    /// Total length of the interval in seconds.
    ///
    /// Stored alongside the row and recomputed on every write so the column
    /// and `(every, period)` can never drift apart.
    pub fn seconds(&self) -> f64 {
        self.every as f64 * self.period.multiplier()
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {} {}", self.every, self.period)
    }
}

/// A schedule value: exactly one of the three recognized kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    Crontab(Crontab),
    Interval(Interval),
    Solar(Solar),
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Crontab(c) => write!(f, "{c}"),
            Schedule::Interval(i) => write!(f, "{i}"),
            Schedule::Solar(s) => write!(f, "{s}"),
        }
    }
}

impl Schedule {
    /// Compute the due state given the previous fire time (UTC) and now.
    ///
    /// `tz` is the configured process timezone; only crontab schedules use
    /// it, since their field patterns are interpreted in local time.
    pub fn is_due(
        &self,
        last_run: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: FixedOffset,
    ) -> Result<DueState> {
        match self {
            Schedule::Interval(interval) => {
                let seconds = interval.seconds();
                let elapsed = duration_secs(now - last_run);
                if elapsed >= seconds {
                    Ok(DueState::due(seconds))
                } else {
                    Ok(DueState::not_due(seconds - elapsed))
                }
            }
            Schedule::Crontab(crontab) => {
                let fields = crontab.fields()?;
                let next_local = fields.next_after(utc_to_local(last_run, tz))?;
                let next = local_to_utc(next_local, tz);
                if now >= next {
                    // Already past the boundary: due, and the next check is
                    // the exact gap to the boundary after now.
                    let following = local_to_utc(fields.next_after(utc_to_local(now, tz))?, tz);
                    Ok(DueState::due(duration_secs(following - now)))
                } else {
                    Ok(DueState::not_due(duration_secs(next - now)))
                }
            }
            Schedule::Solar(solar) => {
                let next = solar.next_event_after(last_run.naive_utc())?;
                if now.naive_utc() >= next {
                    let following = solar.next_event_after(now.naive_utc())?;
                    Ok(DueState::due(duration_secs(following - now.naive_utc())))
                } else {
                    Ok(DueState::not_due(duration_secs(next - now.naive_utc())))
                }
            }
        }
    }
}

/// Convert a naive datetime in the configured local timezone to UTC.
pub(crate) fn local_to_utc(dt: NaiveDateTime, tz: FixedOffset) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(
        dt - Duration::seconds(i64::from(tz.local_minus_utc())),
        Utc,
    )
}

/// Convert a UTC datetime to a naive datetime in the configured timezone.
pub(crate) fn utc_to_local(dt: DateTime<Utc>, tz: FixedOffset) -> NaiveDateTime {
    dt.with_timezone(&tz).naive_local()
}

fn duration_secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1_000.0
}
