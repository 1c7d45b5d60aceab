//! Cronbeat - Database-backed periodic task scheduler
//!
//! Stores schedule definitions (crontab patterns, fixed intervals, solar
//! events) in SQLite and dispatches each task to a pluggable execution
//! backend when it comes due. Schedules can be edited from outside the
//! process; a revision clock in the database tells the running loop when
//! to reload.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cronbeat::{
//!     BeatConfig, BeatScheduler, Interval, IntervalPeriod, MemoryDispatcher,
//!     Schedule, SqliteStore, StaticEntry,
//! };
//! use std::sync::Arc;
//!
//! // Open (or create) the schedule database
//! let store = SqliteStore::open("beat.db").await?;
//!
//! // Declare a static entry: a heartbeat every 30 seconds
//! let config = BeatConfig::new().with_entry(
//!     "heartbeat",
//!     StaticEntry::new(
//!         "app.tasks.heartbeat",
//!         Schedule::Interval(Interval::new(30, IntervalPeriod::Seconds)),
//!     ),
//! );
//!
//! // Run until stopped; fires go to the dispatcher
//! let mut scheduler = BeatScheduler::new(store, Arc::new(MemoryDispatcher::new()), config);
//! let handle = scheduler.handle();
//! scheduler.run().await?;
//! ```

pub mod config;
pub mod dispatch;
pub mod entry;
mod parser;
mod schedule;
mod scheduler;
mod solar;
mod store;
mod types;

pub use config::{parse_timezone, BeatConfig, StaticEntry};
pub use dispatch::{DispatchRequest, MemoryDispatcher, TaskDispatcher};
pub use entry::ScheduleEntry;
pub use parser::Crontab;
pub use schedule::{DueState, Interval, IntervalPeriod, Schedule};
pub use scheduler::{BeatScheduler, SchedulerEvent, SchedulerHandle};
pub use solar::{Solar, SolarEvent};
pub use store::{ScheduleStore, SqliteStore};
pub use types::{BeatError, DispatchOptions, PeriodicTask, Result, ScheduleRef};
