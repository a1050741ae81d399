//! Embedded relational persistence of validation runs, job outcomes, and
//! metrics.
//!
//! [`ResultStore`] is the single source of truth for the orchestrator: the
//! planner reads it through [`ResultStore::needs_rerun`], and every job
//! transition is written back through it. The store assumes a single writer
//! per invocation; [`ResultStore::acquire_run_lock`] turns that assumption
//! into a checked precondition.

mod error;
mod query;
mod rows;

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::{debug, info, warn};
use valsuite_model::{
    EntityKey, Fingerprint, JobHandle, JobResult, JobStatus, Metric,
    MetricRecord, RunId, RunStatus, ScenarioKey, Unit, ValidationRun,
};

pub use error::{StoreError, StoreResult};
pub use query::QueryRows;

use rows::{JobRow, MetricRow, RunRow, entity_key, scenario_key, to_count};

/// Proof that this invocation owns the store. Keep it fresh with
/// [`ResultStore::renew_run_lock`] and release it with
/// [`ResultStore::release_run_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLock {
    owner: String,
    acquired_at: DateTime<Utc>,
    renewed_at: DateTime<Utc>,
}

impl RunLock {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Last time the lock was refreshed; staleness is measured from here.
    pub fn renewed_at(&self) -> DateTime<Utc> {
        self.renewed_at
    }
}

#[derive(Clone, Debug)]
pub struct ResultStore {
    pool: SqlitePool,
}

impl ResultStore {
    /// Opens (creating if missing) the datastore file and applies pending
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        crate::MIGRATOR.run(&pool).await?;
        info!(path = %path.display(), "result store ready");
        Ok(Self { pool })
    }

    /// Opens an existing datastore without creating or migrating it.
    pub async fn open_existing(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(false)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an already-migrated pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates a `running` validation run and returns its store-assigned id.
    pub async fn start_run(
        &self,
        fingerprint: &Fingerprint,
        total_jobs: u64,
    ) -> StoreResult<RunId> {
        let result = sqlx::query(
            r#"
            INSERT INTO validation_runs (
                timestamp, fingerprint, status,
                total_jobs, successful_jobs, failed_jobs
            )
            VALUES (?1, ?2, 'running', ?3, 0, 0)
            "#,
        )
        .bind(Utc::now())
        .bind(fingerprint.as_str())
        .bind(to_count(total_jobs))
        .execute(&self.pool)
        .await?;

        let run_id = RunId(result.last_insert_rowid());
        info!(
            %run_id,
            total_jobs,
            fingerprint = fingerprint.short(),
            "started validation run"
        );
        Ok(run_id)
    }

    /// Terminal update of a run: sets the final status and counts.
    ///
    /// Only `running -> completed | failed` is accepted.
    pub async fn update_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
        succeeded: u64,
        failed: u64,
    ) -> StoreResult<()> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                run_id,
                from: RunStatus::Running,
                to: status,
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE validation_runs
            SET status = ?1, successful_jobs = ?2, failed_jobs = ?3
            WHERE run_id = ?4 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(to_count(succeeded))
        .bind(to_count(failed))
        .bind(run_id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self
                .get_run(run_id)
                .await?
                .ok_or(StoreError::RunNotFound(run_id))?;
            return Err(StoreError::InvalidTransition {
                run_id,
                from: current.status,
                to: status,
            });
        }

        info!(%run_id, %status, succeeded, failed, "finalised validation run");
        Ok(())
    }

    /// Upserts the outcome of one unit keyed by (run, entity, scenario).
    ///
    /// The terminal write keeps the submission timestamp recorded by the
    /// first write when it carries none of its own.
    pub async fn record_job_result(&self, job: &JobResult) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_results (
                run_id, entity, scenario, handle, status,
                submitted_at, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (run_id, entity, scenario) DO UPDATE SET
                handle = CASE
                    WHEN excluded.handle = '' THEN job_results.handle
                    ELSE excluded.handle
                END,
                status = excluded.status,
                submitted_at = COALESCE(excluded.submitted_at, job_results.submitted_at),
                completed_at = excluded.completed_at
            "#,
        )
        .bind(job.run_id.get())
        .bind(job.entity.as_str())
        .bind(job.scenario.as_str())
        .bind(job.handle.as_str())
        .bind(job.status.as_str())
        .bind(job.submitted_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        debug!(
            run_id = %job.run_id,
            entity = %job.entity,
            scenario = %job.scenario,
            status = %job.status,
            "recorded job result"
        );
        Ok(())
    }

    /// Bulk insert of the metrics produced by one successful job.
    ///
    /// Rows colliding with an existing (run, entity, scenario, element, year)
    /// are ignored. Returns the number of rows actually inserted.
    pub async fn store_metrics(
        &self,
        run_id: RunId,
        entity: &EntityKey,
        scenario: &ScenarioKey,
        handle: &JobHandle,
        metrics: &[MetricRecord],
    ) -> StoreResult<u64> {
        if metrics.is_empty() {
            warn!(%entity, %scenario, "no metrics provided");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for metric in metrics {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO metrics (
                    run_id, entity, scenario, handle,
                    element_label, year, value
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(run_id.get())
            .bind(entity.as_str())
            .bind(scenario.as_str())
            .bind(handle.as_str())
            .bind(&metric.element_label)
            .bind(metric.year)
            .bind(metric.value)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        let ignored = metrics.len() as u64 - inserted;
        if ignored > 0 {
            debug!(%entity, %scenario, ignored, "skipped duplicate metrics");
        }
        info!(%entity, %scenario, inserted, "stored metrics");
        Ok(inserted)
    }

    /// The staleness predicate.
    ///
    /// A unit is stale when its most recent attempt (by run order) is not a
    /// success, or was made under a different fingerprint, or when it has
    /// never been attempted.
    pub async fn needs_rerun(
        &self,
        entity: &EntityKey,
        scenario: &ScenarioKey,
        fingerprint: &Fingerprint,
    ) -> StoreResult<bool> {
        let latest: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT jr.status, vr.fingerprint
            FROM job_results jr
            JOIN validation_runs vr ON jr.run_id = vr.run_id
            WHERE jr.entity = ?1 AND jr.scenario = ?2
            ORDER BY jr.run_id DESC
            LIMIT 1
            "#,
        )
        .bind(entity.as_str())
        .bind(scenario.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some((status, previous)) = latest else {
            return Ok(true);
        };
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(!status.is_success() || previous != fingerprint.as_str())
    }

    /// Every unit of `run_id` that did not end in success.
    pub async fn get_failed_jobs(&self, run_id: RunId) -> StoreResult<Vec<Unit>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT entity, scenario
            FROM job_results
            WHERE run_id = ?1 AND status != 'success'
            ORDER BY entity, scenario
            "#,
        )
        .bind(run_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(entity, scenario)| {
                Ok(Unit::new(entity_key(entity)?, scenario_key(scenario)?))
            })
            .collect()
    }

    pub async fn get_run(&self, run_id: RunId) -> StoreResult<Option<ValidationRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT run_id, timestamp, fingerprint, status,
                   total_jobs, successful_jobs, failed_jobs
            FROM validation_runs
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ValidationRun::try_from).transpose()
    }

    /// Most recently started run, if any.
    pub async fn latest_run(&self) -> StoreResult<Option<ValidationRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT run_id, timestamp, fingerprint, status,
                   total_jobs, successful_jobs, failed_jobs
            FROM validation_runs
            ORDER BY run_id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(ValidationRun::try_from).transpose()
    }

    pub async fn run_jobs(&self, run_id: RunId) -> StoreResult<Vec<JobResult>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT run_id, entity, scenario, handle, status,
                   submitted_at, completed_at
            FROM job_results
            WHERE run_id = ?1
            ORDER BY entity, scenario
            "#,
        )
        .bind(run_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobResult::try_from).collect()
    }

    pub async fn metrics_for_run(
        &self,
        run_id: RunId,
        entity: Option<&EntityKey>,
        scenario: Option<&ScenarioKey>,
    ) -> StoreResult<Vec<Metric>> {
        let rows: Vec<MetricRow> = sqlx::query_as(
            r#"
            SELECT run_id, entity, scenario, handle, element_label, year, value
            FROM metrics
            WHERE run_id = ?1
              AND (?2 IS NULL OR entity = ?2)
              AND (?3 IS NULL OR scenario = ?3)
            ORDER BY entity, scenario, element_label, year
            "#,
        )
        .bind(run_id.get())
        .bind(entity.map(EntityKey::as_str))
        .bind(scenario.map(ScenarioKey::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Metric::try_from).collect()
    }

    /// Deletes all but the `keep` most recent runs together with their job
    /// results and metrics. Returns the number of runs removed.
    pub async fn prune_runs(&self, keep: u32) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;

        let doomed: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT run_id FROM validation_runs
            ORDER BY run_id DESC
            LIMIT -1 OFFSET ?1
            "#,
        )
        .bind(i64::from(keep))
        .fetch_all(&mut *tx)
        .await?;

        if doomed.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let newest_doomed = doomed.iter().map(|(id,)| *id).max().unwrap_or(0);
        for table in ["metrics", "job_results", "validation_runs"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE run_id <= ?1"))
                .bind(newest_doomed)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let removed = doomed.len();
        info!(removed, keep, "pruned old validation runs");
        Ok(removed)
    }

    /// Claims exclusive use of the store for one invocation.
    ///
    /// A lock not renewed within `stale_after` is assumed to belong to a
    /// crashed invocation and is taken over.
    pub async fn acquire_run_lock(
        &self,
        owner: &str,
        stale_after: chrono::Duration,
    ) -> StoreResult<RunLock> {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO run_locks (lock_id, owner, acquired_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT (lock_id) DO NOTHING
            "#,
        )
        .bind(owner)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            debug!(owner, "acquired run lock");
            return Ok(RunLock {
                owner: owner.to_string(),
                acquired_at: now,
                renewed_at: now,
            });
        }

        let (holder, since): (String, DateTime<Utc>) = sqlx::query_as(
            "SELECT owner, acquired_at FROM run_locks WHERE lock_id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        if now - since < stale_after {
            return Err(StoreError::Locked { holder, since });
        }

        let taken = sqlx::query(
            r#"
            UPDATE run_locks
            SET owner = ?1, acquired_at = ?2
            WHERE lock_id = 1 AND owner = ?3
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(&holder)
        .execute(&self.pool)
        .await?;

        if taken.rows_affected() == 0 {
            return Err(StoreError::Locked { holder, since });
        }

        warn!(
            previous_owner = %holder,
            held_since = %since,
            "took over stale run lock"
        );
        Ok(RunLock {
            owner: owner.to_string(),
            acquired_at: now,
            renewed_at: now,
        })
    }

    /// Pushes the staleness window of a held lock forward.
    ///
    /// Fails with [`StoreError::LockLost`] when another invocation has taken
    /// the lock over in the meantime.
    pub async fn renew_run_lock(&self, lock: &mut RunLock) -> StoreResult<()> {
        let now = Utc::now();
        let renewed = sqlx::query(
            r#"
            UPDATE run_locks
            SET acquired_at = ?1
            WHERE lock_id = 1 AND owner = ?2
            "#,
        )
        .bind(now)
        .bind(&lock.owner)
        .execute(&self.pool)
        .await?;

        if renewed.rows_affected() == 0 {
            warn!(owner = %lock.owner, "renewal failed: run lock no longer held");
            return Err(StoreError::LockLost {
                owner: lock.owner.clone(),
            });
        }
        debug!(owner = %lock.owner, "renewed run lock");
        lock.renewed_at = now;
        Ok(())
    }

    pub async fn release_run_lock(&self, lock: &RunLock) -> StoreResult<()> {
        let released = sqlx::query(
            "DELETE FROM run_locks WHERE lock_id = 1 AND owner = ?1",
        )
        .bind(&lock.owner)
        .execute(&self.pool)
        .await?;

        if released.rows_affected() == 0 {
            warn!(owner = %lock.owner, "run lock was no longer held at release");
        }
        Ok(())
    }
}
