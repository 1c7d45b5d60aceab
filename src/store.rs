//! SQLite-backed persistence for schedules and periodic tasks
//!
//! Every operation opens a fresh connection inside `spawn_blocking` so the
//! async runtime never blocks on disk. Mutations run in `BEGIN IMMEDIATE`
//! transactions; the revision clock is bumped inside the same transaction
//! as the write it records.
//!
//! Schedule rows are deduplicated by value: writing a schedule that already
//! exists returns the existing row id instead of inserting a duplicate.

use crate::parser::Crontab;
use crate::schedule::{Interval, IntervalPeriod, Schedule};
use crate::solar::{Solar, SolarEvent};
use crate::types::{BeatError, DispatchOptions, PeriodicTask, Result, ScheduleRef};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Schedule storage trait
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a schedule row unless an identical one exists, returning a
    /// reference to the (possibly pre-existing) row
    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<ScheduleRef>;

    /// Resolve a schedule reference back to its value
    async fn load_schedule(&self, schedule_ref: &ScheduleRef) -> Result<Schedule>;

    /// Find a task by name
    async fn find_task(&self, name: &str) -> Result<Option<PeriodicTask>>;

    /// All enabled tasks, ordered by name
    async fn list_enabled(&self) -> Result<Vec<PeriodicTask>>;

    /// Insert or update a task
    async fn save_task(&self, task: &PeriodicTask) -> Result<()>;

    /// Install a statically configured task, matched by name
    async fn install_preset(&self, task: PeriodicTask) -> Result<PeriodicTask>;

    /// Delete a task by name, returning whether a row existed
    async fn delete_task(&self, name: &str) -> Result<bool>;

    /// Record a fire: set `last_run_at` and increment `total_run_count`
    async fn advance_task(&self, id: &str, fired_at: NaiveDateTime) -> Result<()>;

    /// Current value of the revision clock
    async fn revision(&self) -> Result<NaiveDateTime>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS crontab_schedule (
    id            TEXT PRIMARY KEY,
    minute        TEXT NOT NULL DEFAULT '*',
    hour          TEXT NOT NULL DEFAULT '*',
    day_of_week   TEXT NOT NULL DEFAULT '*',
    day_of_month  TEXT NOT NULL DEFAULT '*',
    month_of_year TEXT NOT NULL DEFAULT '*'
);

CREATE TABLE IF NOT EXISTS interval_schedule (
    id      TEXT PRIMARY KEY,
    every   INTEGER NOT NULL,
    period  TEXT NOT NULL,
    seconds REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS solar_schedule (
    id        TEXT PRIMARY KEY,
    event     TEXT NOT NULL,
    latitude  REAL NOT NULL,
    longitude REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS periodic_task (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    task            TEXT NOT NULL,
    description     TEXT,
    args            TEXT NOT NULL DEFAULT '[]',
    kwargs          TEXT NOT NULL DEFAULT '{}',
    queue           TEXT,
    exchange        TEXT,
    routing_key     TEXT,
    priority        INTEGER,
    expires         INTEGER,
    shadow_name     TEXT,
    enabled         INTEGER NOT NULL DEFAULT 1,
    preset          INTEGER NOT NULL DEFAULT 0,
    last_run_at     TEXT,
    total_run_count INTEGER NOT NULL DEFAULT 0,
    start_at        TEXT,
    remarks         TEXT,
    crontab_id      TEXT REFERENCES crontab_schedule (id),
    interval_id     TEXT REFERENCES interval_schedule (id),
    solar_id        TEXT REFERENCES solar_schedule (id)
);

CREATE TABLE IF NOT EXISTS periodic_tasks_meta (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    changed_at TEXT NOT NULL
);
"#;

const TASK_COLUMNS: &str = "id, name, task, description, args, kwargs, \
     queue, exchange, routing_key, priority, expires, shadow_name, \
     enabled, preset, last_run_at, total_run_count, start_at, remarks, \
     crontab_id, interval_id, solar_id";

/// SQLite store holding schedules, periodic tasks, and the revision clock.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `path` and run the
    /// schema migration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            db_path: path.as_ref().to_path_buf(),
        };
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<ScheduleRef> {
        let schedule = schedule.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let schedule_ref = match &schedule {
                Schedule::Crontab(c) => ScheduleRef::Crontab(upsert_crontab(&tx, c)?),
                Schedule::Interval(i) => ScheduleRef::Interval(upsert_interval(&tx, i)?),
                Schedule::Solar(s) => ScheduleRef::Solar(upsert_solar(&tx, s)?),
            };
            tx.commit()?;
            Ok(schedule_ref)
        })
        .await
    }

    async fn load_schedule(&self, schedule_ref: &ScheduleRef) -> Result<Schedule> {
        let schedule_ref = schedule_ref.clone();
        self.with_conn(move |conn| load_schedule(conn, &schedule_ref))
            .await
    }

    async fn find_task(&self, name: &str) -> Result<Option<PeriodicTask>> {
        let name = name.to_string();
        self.with_conn(move |conn| find_by_name(conn, &name)).await
    }

    async fn list_enabled(&self) -> Result<Vec<PeriodicTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM periodic_task WHERE enabled = 1 ORDER BY name"
            ))?;
            let tasks = stmt
                .query_map([], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
        .await
    }

    /// Inserts and definition changes bump the revision clock; updates
    /// touching only `last_run_at` and `total_run_count` do not.
    async fn save_task(&self, task: &PeriodicTask) -> Result<()> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match find_by_id(&tx, &task.id)? {
                None => {
                    insert_task(&tx, &task)?;
                    touch_revision(&tx)?;
                }
                Some(old) => {
                    update_task(&tx, &task)?;
                    if definition_changed(&old, &task) {
                        touch_revision(&tx)?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// An existing row keeps its id, its bookkeeping fields, and its
    /// `enabled` flag (an administrative disable survives reconciliation);
    /// the remaining definition fields are overwritten. A definition with
    /// no description gets the task name. The stored row is returned.
    async fn install_preset(&self, task: PeriodicTask) -> Result<PeriodicTask> {
        let mut task = task;
        if task.description.is_none() {
            task.description = Some(task.name.clone());
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let merged = match find_by_name(&tx, &task.name)? {
                None => {
                    let mut fresh = task;
                    fresh.preset = true;
                    insert_task(&tx, &fresh)?;
                    touch_revision(&tx)?;
                    fresh
                }
                Some(old) => {
                    let mut merged = task;
                    merged.id = old.id.clone();
                    merged.last_run_at = old.last_run_at;
                    merged.total_run_count = old.total_run_count;
                    // The definition never owns the enabled flag, so an
                    // administrative disable survives reconciliation.
                    merged.enabled = old.enabled;
                    merged.preset = true;
                    update_task(&tx, &merged)?;
                    if definition_changed(&old, &merged) {
                        touch_revision(&tx)?;
                    }
                    merged
                }
            };
            tx.commit()?;
            Ok(merged)
        })
        .await
    }

    /// Bumps the revision clock if a row was removed.
    async fn delete_task(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute("DELETE FROM periodic_task WHERE name = ?1", params![name])?;
            if removed > 0 {
                touch_revision(&tx)?;
            }
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    /// Deliberately does NOT bump the revision clock, so the scheduler's
    /// own bookkeeping never triggers a reload.
    async fn advance_task(&self, id: &str, fired_at: NaiveDateTime) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE periodic_task
                 SET last_run_at = ?1, total_run_count = total_run_count + 1
                 WHERE id = ?2",
                params![fired_at, id],
            )?;
            Ok(())
        })
        .await
    }

    /// Creates the meta row on first read.
    async fn revision(&self) -> Result<NaiveDateTime> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<NaiveDateTime> = tx
                .query_row(
                    "SELECT changed_at FROM periodic_tasks_meta WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let changed_at = match existing {
                Some(t) => t,
                None => {
                    let now = Utc::now().naive_utc();
                    tx.execute(
                        "INSERT INTO periodic_tasks_meta (id, changed_at) VALUES (1, ?1)",
                        params![now],
                    )?;
                    now
                }
            };
            tx.commit()?;
            Ok(changed_at)
        })
        .await
    }
}

fn touch_revision(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO periodic_tasks_meta (id, changed_at) VALUES (1, ?1)
         ON CONFLICT (id) DO UPDATE SET changed_at = excluded.changed_at",
        params![Utc::now().naive_utc()],
    )?;
    Ok(())
}

fn upsert_crontab(conn: &Connection, crontab: &Crontab) -> Result<String> {
    // Validates pattern fields before they reach the database.
    crontab.fields()?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM crontab_schedule
             WHERE minute = ?1 AND hour = ?2 AND day_of_week = ?3
               AND day_of_month = ?4 AND month_of_year = ?5",
            params![
                crontab.minute,
                crontab.hour,
                crontab.day_of_week,
                crontab.day_of_month,
                crontab.month_of_year
            ],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO crontab_schedule (id, minute, hour, day_of_week, day_of_month, month_of_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            crontab.minute,
            crontab.hour,
            crontab.day_of_week,
            crontab.day_of_month,
            crontab.month_of_year
        ],
    )?;
    touch_revision(conn)?;
    Ok(id)
}

fn upsert_interval(conn: &Connection, interval: &Interval) -> Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM interval_schedule WHERE every = ?1 AND period = ?2",
            params![interval.every, interval.period.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO interval_schedule (id, every, period, seconds) VALUES (?1, ?2, ?3, ?4)",
        params![id, interval.every, interval.period.as_str(), interval.seconds()],
    )?;
    touch_revision(conn)?;
    Ok(id)
}

fn upsert_solar(conn: &Connection, solar: &Solar) -> Result<String> {
    solar.validate()?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM solar_schedule
             WHERE event = ?1 AND latitude = ?2 AND longitude = ?3",
            params![solar.event.as_str(), solar.latitude, solar.longitude],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO solar_schedule (id, event, latitude, longitude) VALUES (?1, ?2, ?3, ?4)",
        params![id, solar.event.as_str(), solar.latitude, solar.longitude],
    )?;
    touch_revision(conn)?;
    Ok(id)
}

fn load_schedule(conn: &Connection, schedule_ref: &ScheduleRef) -> Result<Schedule> {
    let found = match schedule_ref {
        ScheduleRef::Crontab(id) => conn
            .query_row(
                "SELECT minute, hour, day_of_week, day_of_month, month_of_year
                 FROM crontab_schedule WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Crontab {
                        minute: row.get(0)?,
                        hour: row.get(1)?,
                        day_of_week: row.get(2)?,
                        day_of_month: row.get(3)?,
                        month_of_year: row.get(4)?,
                    })
                },
            )
            .optional()?
            .map(Schedule::Crontab),
        ScheduleRef::Interval(id) => {
            let row: Option<(u64, String)> = conn
                .query_row(
                    "SELECT every, period FROM interval_schedule WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((every, period)) => Some(Schedule::Interval(Interval::new(
                    every,
                    IntervalPeriod::parse(&period)?,
                ))),
                None => None,
            }
        }
        ScheduleRef::Solar(id) => {
            let row: Option<(String, f64, f64)> = conn
                .query_row(
                    "SELECT event, latitude, longitude FROM solar_schedule WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match row {
                Some((event, latitude, longitude)) => Some(Schedule::Solar(Solar {
                    event: SolarEvent::parse(&event)?,
                    latitude,
                    longitude,
                })),
                None => None,
            }
        }
    };
    found.ok_or_else(|| {
        BeatError::Config(format!(
            "task references missing schedule row '{}'",
            schedule_ref.id()
        ))
    })
}

fn schedule_columns(schedule_ref: &ScheduleRef) -> (Option<&str>, Option<&str>, Option<&str>) {
    match schedule_ref {
        ScheduleRef::Crontab(id) => (Some(id.as_str()), None, None),
        ScheduleRef::Interval(id) => (None, Some(id.as_str()), None),
        ScheduleRef::Solar(id) => (None, None, Some(id.as_str())),
    }
}

fn insert_task(conn: &Connection, task: &PeriodicTask) -> Result<()> {
    let (crontab_id, interval_id, solar_id) = schedule_columns(&task.schedule);
    conn.execute(
        "INSERT INTO periodic_task (id, name, task, description, args, kwargs,
             queue, exchange, routing_key, priority, expires, shadow_name,
             enabled, preset, last_run_at, total_run_count, start_at, remarks,
             crontab_id, interval_id, solar_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            task.id,
            task.name,
            task.task,
            task.description,
            serde_json::to_string(&task.args)?,
            serde_json::to_string(&task.kwargs)?,
            task.options.queue,
            task.options.exchange,
            task.options.routing_key,
            task.options.priority,
            task.options.expires,
            task.options.shadow_name,
            task.enabled,
            task.preset,
            task.last_run_at,
            task.total_run_count,
            task.start_at,
            task.remarks,
            crontab_id,
            interval_id,
            solar_id
        ],
    )?;
    Ok(())
}

fn update_task(conn: &Connection, task: &PeriodicTask) -> Result<()> {
    let (crontab_id, interval_id, solar_id) = schedule_columns(&task.schedule);
    conn.execute(
        "UPDATE periodic_task
         SET name = ?2, task = ?3, description = ?4, args = ?5, kwargs = ?6,
             queue = ?7, exchange = ?8, routing_key = ?9, priority = ?10,
             expires = ?11, shadow_name = ?12, enabled = ?13, preset = ?14,
             last_run_at = ?15, total_run_count = ?16, start_at = ?17,
             remarks = ?18, crontab_id = ?19, interval_id = ?20, solar_id = ?21
         WHERE id = ?1",
        params![
            task.id,
            task.name,
            task.task,
            task.description,
            serde_json::to_string(&task.args)?,
            serde_json::to_string(&task.kwargs)?,
            task.options.queue,
            task.options.exchange,
            task.options.routing_key,
            task.options.priority,
            task.options.expires,
            task.options.shadow_name,
            task.enabled,
            task.preset,
            task.last_run_at,
            task.total_run_count,
            task.start_at,
            task.remarks,
            crontab_id,
            interval_id,
            solar_id
        ],
    )?;
    Ok(())
}

fn find_by_id(conn: &Connection, id: &str) -> Result<Option<PeriodicTask>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM periodic_task WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

fn find_by_name(conn: &Connection, name: &str) -> Result<Option<PeriodicTask>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM periodic_task WHERE name = ?1"),
            params![name],
            task_from_row,
        )
        .optional()?;
    Ok(task)
}

/// True when any field other than the bookkeeping pair (`last_run_at`,
/// `total_run_count`) differs. Spelled out so a new field cannot silently
/// start or stop bumping the revision clock.
fn definition_changed(old: &PeriodicTask, new: &PeriodicTask) -> bool {
    old.name != new.name
        || old.task != new.task
        || old.description != new.description
        || old.args != new.args
        || old.kwargs != new.kwargs
        || old.schedule != new.schedule
        || old.enabled != new.enabled
        || old.preset != new.preset
        || old.start_at != new.start_at
        || old.options != new.options
        || old.remarks != new.remarks
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodicTask> {
    let args_text: String = row.get(4)?;
    let kwargs_text: String = row.get(5)?;
    let args = serde_json::from_str(&args_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let kwargs = serde_json::from_str(&kwargs_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    let crontab_id: Option<String> = row.get(18)?;
    let interval_id: Option<String> = row.get(19)?;
    let solar_id: Option<String> = row.get(20)?;
    let schedule = match (crontab_id, interval_id, solar_id) {
        (Some(id), None, None) => ScheduleRef::Crontab(id),
        (None, Some(id), None) => ScheduleRef::Interval(id),
        (None, None, Some(id)) => ScheduleRef::Solar(id),
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                18,
                Type::Text,
                "task must reference exactly one schedule row".into(),
            ))
        }
    };

    Ok(PeriodicTask {
        id: row.get(0)?,
        name: row.get(1)?,
        task: row.get(2)?,
        description: row.get(3)?,
        args,
        kwargs,
        schedule,
        enabled: row.get(12)?,
        preset: row.get(13)?,
        last_run_at: row.get(14)?,
        total_run_count: row.get(15)?,
        start_at: row.get(16)?,
        remarks: row.get(17)?,
        options: DispatchOptions {
            queue: row.get(6)?,
            exchange: row.get(7)?,
            routing_key: row.get(8)?,
            priority: row.get(9)?,
            expires: row.get(10)?,
            shadow_name: row.get(11)?,
        },
    })
}
