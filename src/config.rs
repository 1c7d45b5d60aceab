//! Process-level scheduler configuration
//!
//! Carries the local timezone, the loop's maximum sleep, the dispatch
//! timeout, and the static schedule entries reconciled into storage at
//! startup.

use crate::schedule::Schedule;
use crate::types::{BeatError, DispatchOptions, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Ceiling on the loop's sleep between ticks. Keeps newly inserted tasks
/// and revision-clock changes from being missed for too long.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on a single dispatch call before it is treated as failed.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A statically configured schedule entry, reconciled into the task table
/// at startup with `preset = true`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticEntry {
    /// Target task identifier passed to the dispatcher
    pub task: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub options: DispatchOptions,
}

impl StaticEntry {
    pub fn new(task: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            task: task.into(),
            schedule,
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
            options: DispatchOptions::default(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct BeatConfig {
    /// Local timezone for crontab interpretation and stored timestamps
    pub timezone: FixedOffset,
    /// Maximum sleep between ticks
    pub max_interval: Duration,
    /// Bound on a single dispatch call
    pub dispatch_timeout: Duration,
    /// Static schedule definitions, keyed by task name
    pub entries: HashMap<String, StaticEntry>,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            timezone: Utc.fix(),
            max_interval: DEFAULT_MAX_INTERVAL,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            entries: HashMap::new(),
        }
    }
}

impl BeatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local timezone from an offset identifier
    /// (`"UTC"`, `"+08:00"`, `"-05:30"`, `"UTC+02:00"`).
    pub fn with_timezone(mut self, identifier: &str) -> Result<Self> {
        self.timezone = parse_timezone(identifier)?;
        Ok(self)
    }

    pub fn with_timezone_offset(mut self, tz: FixedOffset) -> Self {
        self.timezone = tz;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Add a static schedule entry.
    pub fn with_entry(mut self, name: impl Into<String>, entry: StaticEntry) -> Self {
        self.entries.insert(name.into(), entry);
        self
    }
}

/// Parse a fixed-offset timezone identifier.
///
/// Named tz-database zones are not supported; the scheduler interprets
/// crontab fields in a fixed offset from UTC.
pub fn parse_timezone(identifier: &str) -> Result<FixedOffset> {
    let s = identifier.trim();
    let s = s.strip_prefix("UTC").unwrap_or(s);

    if s.is_empty() || s == "Z" {
        return offset(0);
    }

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => {
            return Err(BeatError::Config(format!(
                "unrecognized timezone identifier '{identifier}' (expected UTC or a ±HH:MM offset)"
            )))
        }
    };

    let (hours_str, minutes_str) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let hours: i32 = hours_str
        .parse()
        .map_err(|_| BeatError::Config(format!("invalid offset hours in '{identifier}'")))?;
    let minutes: i32 = minutes_str
        .parse()
        .map_err(|_| BeatError::Config(format!("invalid offset minutes in '{identifier}'")))?;
    if hours > 23 || minutes > 59 {
        return Err(BeatError::Config(format!(
            "offset out of range in '{identifier}'"
        )));
    }

    offset(sign * (hours * 3_600 + minutes * 60))
}

fn offset(seconds: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| BeatError::Config(format!("UTC offset out of range: {seconds}s")))
}
