//! End-to-end scheduler tests over the public API

use chrono::{Duration, TimeZone, Utc};
use cronbeat::{
    BeatConfig, BeatScheduler, Crontab, Interval, IntervalPeriod, MemoryDispatcher, PeriodicTask,
    Schedule, ScheduleStore, SqliteStore, StaticEntry,
};
use std::sync::Arc;
use tempfile::NamedTempFile;

fn every_seconds(secs: u64) -> Schedule {
    Schedule::Interval(Interval::new(secs, IntervalPeriod::Seconds))
}

async fn open_store() -> (NamedTempFile, SqliteStore) {
    let file = NamedTempFile::new().unwrap();
    let store = SqliteStore::open(file.path()).await.unwrap();
    (file, store)
}

#[tokio::test]
async fn preset_heartbeat_survives_restart() {
    let (_file, store) = open_store().await;
    let config = || {
        BeatConfig::new().with_entry(
            "heartbeat",
            StaticEntry::new("app.tasks.heartbeat", every_seconds(10)),
        )
    };

    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler =
        BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), config());
    scheduler.setup().await.unwrap();

    let installed = store.find_task("heartbeat").await.unwrap().unwrap();
    assert!(installed.preset);

    // Backdate the previous fire, then let a fresh scheduler (which loads
    // its entries from the row) fire once so there is run history.
    let now = Utc::now();
    let mut task = installed.clone();
    task.last_run_at = Some((now - Duration::hours(1)).naive_utc());
    store.save_task(&task).await.unwrap();
    let mut runner = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), config());
    runner.tick(now).await.unwrap();
    assert_eq!(dispatcher.sent().await.len(), 1);

    // A fresh process reconciling the same configuration keeps the row's
    // identity and bookkeeping.
    let mut restarted =
        BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), config());
    restarted.setup().await.unwrap();

    let after = store.find_task("heartbeat").await.unwrap().unwrap();
    assert_eq!(after.id, installed.id);
    assert_eq!(after.total_run_count, 1);
}

#[tokio::test]
async fn disabled_task_never_fires() {
    let (_file, store) = open_store().await;
    let now = Utc::now();

    let schedule_ref = store.upsert_schedule(&every_seconds(10)).await.unwrap();
    let mut task = PeriodicTask::new("quiet", "app.quiet", schedule_ref);
    task.enabled = false;
    task.last_run_at = Some((now - Duration::hours(1)).naive_utc());
    store.save_task(&task).await.unwrap();

    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), BeatConfig::new());
    scheduler.tick(now).await.unwrap();
    scheduler.tick(now + Duration::hours(1)).await.unwrap();
    assert!(dispatcher.sent().await.is_empty());

    let row = store.find_task("quiet").await.unwrap().unwrap();
    assert_eq!(row.total_run_count, 0);
}

#[tokio::test]
async fn start_at_gate_holds_until_passed() {
    let (_file, store) = open_store().await;
    let now = Utc::now();

    let schedule_ref = store.upsert_schedule(&every_seconds(10)).await.unwrap();
    let mut task = PeriodicTask::new("later", "app.later", schedule_ref);
    task.last_run_at = Some((now - Duration::hours(1)).naive_utc());
    task.start_at = Some((now + Duration::hours(1)).naive_utc());
    store.save_task(&task).await.unwrap();

    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), BeatConfig::new());

    // Well overdue by interval arithmetic, but gated.
    scheduler.tick(now).await.unwrap();
    scheduler.tick(now + Duration::minutes(30)).await.unwrap();
    assert!(dispatcher.sent().await.is_empty());

    // Past the gate the schedule takes over.
    scheduler.tick(now + Duration::minutes(61)).await.unwrap();
    assert_eq!(dispatcher.sent().await.len(), 1);
}

#[tokio::test]
async fn crontab_fires_in_local_timezone() {
    let (_file, store) = open_store().await;

    // Daily at 04:00 in a +02:00 zone, i.e. 02:00 UTC.
    let schedule = Schedule::Crontab(Crontab::new("0", "4", "*", "*", "*").unwrap());
    let schedule_ref = store.upsert_schedule(&schedule).await.unwrap();
    let mut task = PeriodicTask::new("nightly", "app.nightly", schedule_ref);
    // Previous fire: yesterday 04:00 local.
    task.last_run_at = Utc
        .with_ymd_and_hms(2026, 2, 4, 4, 0, 0)
        .unwrap()
        .naive_utc()
        .into();
    store.save_task(&task).await.unwrap();

    let config = BeatConfig::new().with_timezone("+02:00").unwrap();
    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), config);

    // 01:59 UTC is 03:59 local: not yet.
    let before = Utc.with_ymd_and_hms(2026, 2, 5, 1, 59, 0).unwrap();
    scheduler.tick(before).await.unwrap();
    assert!(dispatcher.sent().await.is_empty());

    // 02:00:05 UTC is just past 04:00 local.
    let after = Utc.with_ymd_and_hms(2026, 2, 5, 2, 0, 5).unwrap();
    scheduler.tick(after).await.unwrap();
    assert_eq!(dispatcher.sent().await.len(), 1);

    // last_run_at is stored naive in local time.
    let row = store.find_task("nightly").await.unwrap().unwrap();
    assert_eq!(
        row.last_run_at,
        Some(
            Utc.with_ymd_and_hms(2026, 2, 5, 4, 0, 5)
                .unwrap()
                .naive_utc()
        )
    );
    assert_eq!(row.total_run_count, 1);

    // Fires once per boundary, not once per tick.
    scheduler
        .tick(Utc.with_ymd_and_hms(2026, 2, 5, 2, 1, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(dispatcher.sent().await.len(), 1);
}

#[tokio::test]
async fn external_insert_is_picked_up() {
    let (_file, store) = open_store().await;
    let now = Utc::now();

    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), BeatConfig::new());
    scheduler.tick(now).await.unwrap();
    assert!(dispatcher.sent().await.is_empty());

    // Another process inserts a task between ticks; the revision clock
    // moves and the next tick sees it.
    let schedule_ref = store.upsert_schedule(&every_seconds(10)).await.unwrap();
    let mut task = PeriodicTask::new("new", "app.new", schedule_ref);
    task.last_run_at = Some((now - Duration::hours(1)).naive_utc());
    store.save_task(&task).await.unwrap();

    scheduler.tick(now + Duration::seconds(5)).await.unwrap();
    let sent = dispatcher.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].entry_name, "new");

    // Deleting it stops the fires.
    assert!(store.delete_task("new").await.unwrap());
    scheduler.tick(now + Duration::hours(1)).await.unwrap();
    assert_eq!(dispatcher.sent().await.len(), 1);
}

#[tokio::test]
async fn dispatch_carries_payload_and_options() {
    let (_file, store) = open_store().await;
    let now = Utc::now();

    let schedule_ref = store.upsert_schedule(&every_seconds(10)).await.unwrap();
    let mut kwargs = serde_json::Map::new();
    kwargs.insert("batch".into(), serde_json::json!(100));
    let mut task = PeriodicTask::new("export", "app.export", schedule_ref)
        .with_args(vec![serde_json::json!("daily")])
        .with_kwargs(kwargs)
        .with_options(cronbeat::DispatchOptions {
            queue: Some("exports".into()),
            priority: Some(7),
            ..Default::default()
        });
    task.last_run_at = Some((now - Duration::hours(1)).naive_utc());
    store.save_task(&task).await.unwrap();

    let dispatcher = Arc::new(MemoryDispatcher::new());
    let mut scheduler = BeatScheduler::new(Arc::new(store.clone()), dispatcher.clone(), BeatConfig::new());
    scheduler.tick(now).await.unwrap();

    let sent = dispatcher.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].task, "app.export");
    assert_eq!(sent[0].args, vec![serde_json::json!("daily")]);
    assert_eq!(sent[0].kwargs["batch"], 100);
    assert_eq!(sent[0].options.queue.as_deref(), Some("exports"));
    assert_eq!(sent[0].options.priority, Some(7));
    // The entry name rides along as the display name.
    assert_eq!(sent[0].options.shadow_name.as_deref(), Some("export"));
}
