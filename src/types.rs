//! Core types for the cronbeat scheduler

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, BeatError>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum BeatError {
    /// Invalid schedule definition (bad crontab field, impossible field
    /// combination, out-of-range coordinates, unsupported schedule type)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying database failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A blocking storage task failed to complete
    #[error("Storage task failed: {0}")]
    StorageTask(#[from] tokio::task::JoinError),

    /// Submission to the execution backend failed or timed out
    #[error("Failed to dispatch task '{task}': {reason}")]
    Dispatch { task: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reference from a periodic task to exactly one schedule row.
///
/// The three schedule tables are deduplicated by value, so many tasks may
/// point at the same row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleRef {
    Crontab(String),
    Interval(String),
    Solar(String),
}

impl ScheduleRef {
    /// The referenced row id.
    pub fn id(&self) -> &str {
        match self {
            ScheduleRef::Crontab(id) | ScheduleRef::Interval(id) | ScheduleRef::Solar(id) => id,
        }
    }
}

/// Options passed through verbatim to the dispatch interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Seconds after which an undelivered submission expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,

    /// Display name the backend should show instead of the task target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_name: Option<String>,
}

/// A persisted periodic task definition.
///
/// The scheduler only ever mutates `last_run_at` and `total_run_count`;
/// everything else is owned by administrative edits or preset reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicTask {
    /// Stable unique id (uuid v4)
    pub id: String,

    /// Unique human-readable name
    pub name: String,

    /// Opaque identifier of the executable job
    pub task: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Positional arguments, JSON-serializable
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    /// Keyword arguments, JSON-serializable
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,

    /// Reference to exactly one schedule row
    pub schedule: ScheduleRef,

    /// Disabled tasks are never due
    pub enabled: bool,

    /// Installed from static configuration rather than user-created
    pub preset: bool,

    /// Time of the previous fire, stored naive in the configured local
    /// timezone (converted to UTC at the entry boundary)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<NaiveDateTime>,

    /// Monotonically increasing fire count
    pub total_run_count: u64,

    /// Never due before this time (stored like `last_run_at`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<NaiveDateTime>,

    #[serde(default)]
    pub options: DispatchOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl PeriodicTask {
    /// Create a new task definition with bookkeeping fields zeroed.
    pub fn new(
        name: impl Into<String>,
        task: impl Into<String>,
        schedule: ScheduleRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            task: task.into(),
            description: None,
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
            schedule,
            enabled: true,
            preset: false,
            last_run_at: None,
            total_run_count: 0,
            start_at: None,
            options: DispatchOptions::default(),
            remarks: None,
        }
    }

    /// Set positional arguments
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Set keyword arguments
    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, serde_json::Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Set dispatch options
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the not-before gate
    pub fn with_start_at(mut self, start_at: NaiveDateTime) -> Self {
        self.start_at = Some(start_at);
        self
    }
}
