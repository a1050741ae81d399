use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use valsuite_core::store::{ResultStore, StoreError};
use valsuite_model::{
    EntityKey, Fingerprint, JobHandle, JobResult, JobStatus, MetricRecord, RunId,
    RunStatus, ScenarioKey,
};

fn entity(key: &str) -> EntityKey {
    EntityKey::new(key).expect("entity key")
}

fn scenario(key: &str) -> ScenarioKey {
    ScenarioKey::new(key).expect("scenario key")
}

fn fingerprint(value: &str) -> Fingerprint {
    Fingerprint::new(value).expect("fingerprint")
}

fn job(run_id: RunId, e: &str, s: &str, status: JobStatus) -> JobResult {
    let now = Utc::now();
    JobResult {
        run_id,
        entity: entity(e),
        scenario: scenario(s),
        handle: JobHandle::new(format!("job-{e}-{s}")),
        status,
        submitted_at: Some(now),
        completed_at: status.is_terminal().then_some(now),
    }
}

fn metric(label: &str, year: i64, value: f64) -> MetricRecord {
    MetricRecord {
        element_label: label.to_string(),
        year,
        value,
    }
}

/// One finished run holding a single unit with the given status.
async fn seed(store: &ResultStore, fp: &str, e: &str, s: &str, status: JobStatus) -> RunId {
    let run_id = store.start_run(&fingerprint(fp), 1).await.expect("start run");
    store
        .record_job_result(&job(run_id, e, s, status))
        .await
        .expect("record");
    let (ok, failed) = if status.is_success() { (1, 0) } else { (0, 1) };
    store
        .update_run_status(run_id, RunStatus::from_failures(failed), ok, failed)
        .await
        .expect("finalise");
    run_id
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn start_run_creates_running_row(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let run_id = store.start_run(&fingerprint("abc"), 4).await.expect("start");

    let run = store.get_run(run_id).await.expect("get").expect("exists");
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.total_jobs, 4);
    assert_eq!(run.fingerprint.as_str(), "abc");
    assert_eq!(store.latest_run().await.expect("latest").map(|r| r.run_id), Some(run_id));
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn update_run_status_is_terminal_and_monotonic(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let run_id = store.start_run(&fingerprint("abc"), 2).await.expect("start");

    let err = store
        .update_run_status(run_id, RunStatus::Running, 0, 0)
        .await
        .expect_err("running is not terminal");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store
        .update_run_status(run_id, RunStatus::Failed, 1, 1)
        .await
        .expect("finalise");
    let run = store.get_run(run_id).await.expect("get").expect("exists");
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!((run.successful_jobs, run.failed_jobs), (1, 1));

    let err = store
        .update_run_status(run_id, RunStatus::Completed, 2, 0)
        .await
        .expect_err("second terminal update");
    assert!(matches!(
        err,
        StoreError::InvalidTransition { from: RunStatus::Failed, .. }
    ));

    let err = store
        .update_run_status(RunId(9_999), RunStatus::Completed, 0, 0)
        .await
        .expect_err("unknown run");
    assert!(matches!(err, StoreError::RunNotFound(RunId(9_999))));
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn job_result_upsert_keeps_one_row_per_unit(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool.clone());
    let run_id = store.start_run(&fingerprint("abc"), 1).await.expect("start");

    let submitted = job(run_id, "KEN", "base", JobStatus::Submitted);
    store.record_job_result(&submitted).await.expect("submitted");

    let terminal = JobResult {
        status: JobStatus::Success,
        submitted_at: None,
        completed_at: Some(Utc::now()),
        ..submitted.clone()
    };
    store.record_job_result(&terminal).await.expect("terminal");

    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM job_results")
        .fetch_one(&pool)
        .await
        .expect("count")
        .get("n");
    assert_eq!(count, 1);

    let jobs = store.run_jobs(run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Success);
    assert_eq!(jobs[0].handle, submitted.handle);
    assert!(jobs[0].completed_at.is_some());
    // the terminal write carried no submission time; the first one is kept
    assert!(jobs[0].submitted_at.is_some());
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn needs_rerun_follows_staleness_rules(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let (ken, base) = (entity("KEN"), scenario("base"));

    // never attempted
    assert!(store.needs_rerun(&ken, &base, &fingerprint("f1")).await.expect("q"));

    seed(&store, "f1", "KEN", "base", JobStatus::Success).await;
    let fresh = store.needs_rerun(&ken, &base, &fingerprint("f1")).await.expect("q");
    let again = store.needs_rerun(&ken, &base, &fingerprint("f1")).await.expect("q");
    assert!(!fresh);
    assert_eq!(fresh, again, "planning must be idempotent");
    assert!(store.needs_rerun(&ken, &base, &fingerprint("f2")).await.expect("q"));

    // other units are unaffected
    assert!(store
        .needs_rerun(&entity("UGA"), &base, &fingerprint("f1"))
        .await
        .expect("q"));
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn latest_failure_always_triggers_rerun(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let (ken, base) = (entity("KEN"), scenario("base"));

    seed(&store, "f1", "KEN", "base", JobStatus::Success).await;
    for status in [
        JobStatus::Failed,
        JobStatus::Timeout,
        JobStatus::FailedSubmission,
        JobStatus::FailedPreparation,
    ] {
        seed(&store, "f1", "KEN", "base", status).await;
        assert!(
            store.needs_rerun(&ken, &base, &fingerprint("f1")).await.expect("q"),
            "{status} must be retried"
        );
    }

    // a later success under the same fingerprint settles it again
    seed(&store, "f1", "KEN", "base", JobStatus::Success).await;
    assert!(!store.needs_rerun(&ken, &base, &fingerprint("f1")).await.expect("q"));
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn failed_jobs_lists_every_non_success(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let run_id = store.start_run(&fingerprint("abc"), 3).await.expect("start");
    for (e, status) in [
        ("KEN", JobStatus::Success),
        ("UGA", JobStatus::Timeout),
        ("TZA", JobStatus::FailedSubmission),
    ] {
        store
            .record_job_result(&job(run_id, e, "base", status))
            .await
            .expect("record");
    }

    let failed = store.get_failed_jobs(run_id).await.expect("failed");
    let keys: Vec<_> = failed.iter().map(|u| u.entity.as_str()).collect();
    assert_eq!(keys, ["TZA", "UGA"]);
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn duplicate_metrics_are_ignored(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let run_id = store.start_run(&fingerprint("abc"), 1).await.expect("start");
    let (ken, base) = (entity("KEN"), scenario("base"));
    let handle = JobHandle::new("job-1");

    let records = vec![
        metric("Healthy Years Lived", 2025, 1.0),
        metric("Healthy Years Lived", 2026, 2.0),
        metric("Healthy Years Lived", 2025, 9.0),
    ];
    let inserted = store
        .store_metrics(run_id, &ken, &base, &handle, &records)
        .await
        .expect("store");
    assert_eq!(inserted, 2);

    let again = store
        .store_metrics(run_id, &ken, &base, &handle, &records)
        .await
        .expect("store again");
    assert_eq!(again, 0);

    let stored = store.metrics_for_run(run_id, Some(&ken), None).await.expect("metrics");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].value, 1.0, "first write wins");
    assert!(store
        .metrics_for_run(run_id, None, Some(&scenario("other")))
        .await
        .expect("metrics")
        .is_empty());
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn run_lock_is_exclusive_until_released_or_stale(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool.clone());
    let hour = Duration::hours(1);

    let first = store.acquire_run_lock("first", hour).await.expect("acquire");
    let err = store
        .acquire_run_lock("second", hour)
        .await
        .expect_err("held");
    assert!(matches!(err, StoreError::Locked { ref holder, .. } if holder == "first"));

    store.release_run_lock(&first).await.expect("release");
    let second = store.acquire_run_lock("second", hour).await.expect("reacquire");
    assert_eq!(second.owner(), "second");

    // age the lock past the staleness window
    sqlx::query("UPDATE run_locks SET acquired_at = ?1")
        .bind(Utc::now() - Duration::hours(2))
        .execute(&pool)
        .await
        .expect("age lock");
    let third = store.acquire_run_lock("third", hour).await.expect("take over");
    assert_eq!(third.owner(), "third");

    // the displaced owner releasing is harmless
    store.release_run_lock(&second).await.expect("stale release");
    assert!(store.acquire_run_lock("fourth", hour).await.is_err());
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn renewed_lock_outlives_its_original_window(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool.clone());
    let hour = Duration::hours(1);

    let mut held = store.acquire_run_lock("long-run", hour).await.expect("acquire");
    // a run that has been going for longer than the window
    sqlx::query("UPDATE run_locks SET acquired_at = ?1")
        .bind(Utc::now() - Duration::hours(2))
        .execute(&pool)
        .await
        .expect("age lock");

    store.renew_run_lock(&mut held).await.expect("renew");
    assert!(held.renewed_at() >= held.acquired_at());
    let err = store
        .acquire_run_lock("latecomer", hour)
        .await
        .expect_err("renewed lock is not stale");
    assert!(matches!(err, StoreError::Locked { ref holder, .. } if holder == "long-run"));

    store.release_run_lock(&held).await.expect("release");
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn displaced_owner_cannot_renew(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool.clone());
    let hour = Duration::hours(1);

    let mut first = store.acquire_run_lock("first", hour).await.expect("acquire");
    sqlx::query("UPDATE run_locks SET acquired_at = ?1")
        .bind(Utc::now() - Duration::hours(2))
        .execute(&pool)
        .await
        .expect("age lock");
    let second = store.acquire_run_lock("second", hour).await.expect("take over");

    let err = store
        .renew_run_lock(&mut first)
        .await
        .expect_err("lock was taken over");
    assert!(matches!(err, StoreError::LockLost { ref owner } if owner == "first"));

    let (holder,): (String,) = sqlx::query_as("SELECT owner FROM run_locks")
        .fetch_one(&pool)
        .await
        .expect("holder");
    assert_eq!(holder, second.owner());
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn prune_keeps_most_recent_runs(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    let mut runs = Vec::new();
    for e in ["A", "B", "C"] {
        runs.push(seed(&store, "f1", e, "base", JobStatus::Success).await);
    }

    assert_eq!(store.prune_runs(5).await.expect("noop"), 0);
    assert_eq!(store.prune_runs(1).await.expect("prune"), 2);

    assert!(store.get_run(runs[0]).await.expect("get").is_none());
    assert!(store.get_run(runs[2]).await.expect("get").is_some());
    assert!(store.run_jobs(runs[1]).await.expect("jobs").is_empty());
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn readonly_query_returns_typed_cells_and_rejects_writes(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    seed(&store, "f1", "KEN", "base", JobStatus::Success).await;

    let rows = store
        .query_readonly("SELECT run_id, fingerprint, total_jobs FROM validation_runs")
        .await
        .expect("select");
    assert_eq!(rows.columns, ["run_id", "fingerprint", "total_jobs"]);
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(rows.rows[0][1], serde_json::json!("f1"));
    assert_eq!(rows.rows[0][2], serde_json::json!(1));

    let empty = store
        .query_readonly("SELECT entity FROM job_results WHERE entity = 'nobody'")
        .await
        .expect("empty select");
    assert!(empty.is_empty());
    assert_eq!(empty.columns, ["entity"]);

    assert!(store
        .query_readonly("DELETE FROM validation_runs")
        .await
        .is_err());
    // regular operations are unaffected by the read-only connection
    seed(&store, "f2", "UGA", "base", JobStatus::Failed).await;
    assert_eq!(
        store.latest_run().await.expect("latest").map(|r| r.fingerprint.as_str().to_string()),
        Some("f2".to_string())
    );
}

#[sqlx::test(migrator = "valsuite_core::MIGRATOR")]
async fn readonly_query_cannot_switch_itself_back_to_writes(pool: SqlitePool) {
    let store = ResultStore::from_pool(pool);
    seed(&store, "f1", "KEN", "base", JobStatus::Success).await;

    let err = store
        .query_readonly("PRAGMA query_only = OFF; DELETE FROM validation_runs; SELECT 1")
        .await
        .expect_err("stacked statements");
    assert!(matches!(err, StoreError::RejectedQuery(_)));

    assert!(store
        .query_readonly("PRAGMA query_only = OFF")
        .await
        .is_ok_and(|rows| rows.is_empty()));
    assert!(store
        .query_readonly("DELETE FROM validation_runs;")
        .await
        .is_err());

    assert!(store.latest_run().await.expect("latest").is_some());
    let rows = store
        .query_readonly("SELECT COUNT(*) AS runs FROM validation_runs;")
        .await
        .expect("count");
    assert_eq!(rows.rows, [[serde_json::json!(1)]]);
}
