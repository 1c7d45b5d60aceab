//! The beat loop: reconcile, reload, tick, dispatch
//!
//! [`BeatScheduler`] owns the in-memory entry map and drives the cycle:
//! install static entries at startup, reload from storage whenever the
//! revision clock moves, ask each entry whether it is due, and hand due
//! fires to the dispatcher. Only a delivered fire advances an entry's
//! bookkeeping, so a failed dispatch is retried at the next wake.

use crate::config::BeatConfig;
use crate::dispatch::{DispatchRequest, TaskDispatcher};
use crate::entry::ScheduleEntry;
use crate::store::ScheduleStore;
use crate::types::{BeatError, PeriodicTask, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Lifecycle and dispatch notifications observable via [`BeatScheduler::subscribe`].
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started,
    Stopped,
    /// The entry map was rebuilt from storage
    Reloaded { entries: usize },
    Dispatched { name: String, task: String },
    DispatchFailed { name: String, reason: String },
}

/// Remote control for a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    running: Arc<RwLock<bool>>,
    stop_signal: Arc<Notify>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        self.stop_signal.notify_waiters();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }
}

/// Database-backed periodic task scheduler.
pub struct BeatScheduler {
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: BeatConfig,
    entries: HashMap<String, ScheduleEntry>,
    last_revision: Option<NaiveDateTime>,
    events: broadcast::Sender<SchedulerEvent>,
    running: Arc<RwLock<bool>>,
    stop_signal: Arc<Notify>,
}

impl BeatScheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: BeatConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            dispatcher,
            config,
            entries: HashMap::new(),
            last_revision: None,
            events,
            running: Arc::new(RwLock::new(false)),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            running: self.running.clone(),
            stop_signal: self.stop_signal.clone(),
            events: self.events.clone(),
        }
    }

    /// Install the statically configured entries and load the initial
    /// entry map. Existing rows keep their identity and run history; an
    /// invalid static schedule is logged and skipped.
    pub async fn setup(&mut self) -> Result<()> {
        let mut names: Vec<&String> = self.config.entries.keys().collect();
        names.sort();
        let static_entries: Vec<(String, crate::config::StaticEntry)> = names
            .into_iter()
            .filter_map(|n| self.config.entries.get(n).map(|e| (n.clone(), e.clone())))
            .collect();

        for (name, static_entry) in static_entries {
            let schedule_ref = match self.store.upsert_schedule(&static_entry.schedule).await {
                Ok(r) => r,
                Err(BeatError::Config(reason)) => {
                    warn!(%name, %reason, "skipping static entry with invalid schedule");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let task = PeriodicTask::new(name.clone(), static_entry.task, schedule_ref)
                .with_args(static_entry.args)
                .with_kwargs(static_entry.kwargs)
                .with_options(static_entry.options);
            self.store.install_preset(task).await?;
            debug!(%name, "installed static entry");
        }
        self.reload(Utc::now()).await
    }

    /// Rebuild the entry map from storage. Live entries whose stored
    /// definition is unchanged are kept, so the wait window of a task that
    /// has never fired survives reloads.
    async fn reload(&mut self, now: DateTime<Utc>) -> Result<()> {
        let revision = self.store.revision().await?;
        let stored = self.store.list_enabled().await?;

        let mut next = HashMap::with_capacity(stored.len());
        for task in stored {
            if let Some(existing) = self.entries.get(&task.name) {
                if existing.matches_definition(&task) {
                    next.insert(task.name.clone(), existing.clone());
                    continue;
                }
            }
            let schedule = match self.store.load_schedule(&task.schedule).await {
                Ok(s) => s,
                Err(BeatError::Config(reason)) => {
                    warn!(name = %task.name, %reason, "skipping entry with unresolvable schedule");
                    continue;
                }
                Err(e) => return Err(e),
            };
            next.insert(
                task.name.clone(),
                ScheduleEntry::new(task, schedule, self.config.timezone, now),
            );
        }

        info!(entries = next.len(), "schedule reloaded");
        self.entries = next;
        self.last_revision = Some(revision);
        self.emit(SchedulerEvent::Reloaded {
            entries: self.entries.len(),
        });
        Ok(())
    }

    /// One pass over the entry map at `now`. Returns how many seconds the
    /// loop should sleep before the next pass, bounded by `max_interval`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<f64> {
        let revision = self.store.revision().await?;
        if self.last_revision != Some(revision) {
            self.reload(now).await?;
        }

        let tz = self.config.timezone;
        let max_sleep = self.config.max_interval.as_secs_f64();
        let mut sleep = max_sleep;

        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();

        for name in names {
            let (state, request, entry_id) = {
                let entry = match self.entries.get(&name) {
                    Some(e) => e,
                    None => continue,
                };
                let state = match entry.is_due(now, tz) {
                    Ok(s) => s,
                    Err(BeatError::Config(reason)) => {
                        warn!(%name, %reason, "skipping entry with invalid schedule");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                (
                    state,
                    DispatchRequest::from_task(&entry.task),
                    entry.task.id.clone(),
                )
            };

            if !state.is_due {
                sleep = sleep.min(state.next_check_secs);
                continue;
            }

            let task_target = request.task.clone();
            let outcome = tokio::time::timeout(
                self.config.dispatch_timeout,
                self.dispatcher.dispatch(request),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    let fired_local = match self.entries.get_mut(&name) {
                        Some(entry) => entry.advance(now, tz),
                        None => continue,
                    };
                    self.store.advance_task(&entry_id, fired_local).await?;
                    debug!(%name, task = %task_target, "dispatched");
                    self.emit(SchedulerEvent::Dispatched {
                        name: name.clone(),
                        task: task_target,
                    });
                    sleep = sleep.min(state.next_check_secs);
                }
                Ok(Err(e)) => {
                    warn!(%name, error = %e, "dispatch failed");
                    self.emit(SchedulerEvent::DispatchFailed {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        %name,
                        timeout_secs = self.config.dispatch_timeout.as_secs_f64(),
                        "dispatch timed out"
                    );
                    self.emit(SchedulerEvent::DispatchFailed {
                        name: name.clone(),
                        reason: "dispatch timed out".to_string(),
                    });
                }
            }
        }

        Ok(sleep.clamp(0.0, max_sleep))
    }

    /// Run until stopped via the [`SchedulerHandle`]. A failed tick is
    /// logged and retried at the next wake instead of ending the loop.
    pub async fn run(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("beat scheduler starting");
        self.emit(SchedulerEvent::Started);
        self.setup().await?;

        while *self.running.read().await {
            let sleep = match self.tick(Utc::now()).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "tick failed, retrying at next wake");
                    self.config.max_interval.as_secs_f64()
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(sleep)) => {}
                _ = self.stop_signal.notified() => {}
            }
        }

        info!("beat scheduler stopped");
        self.emit(SchedulerEvent::Stopped);
        Ok(())
    }

    fn emit(&self, event: SchedulerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
