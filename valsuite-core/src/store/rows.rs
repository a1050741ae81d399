//! Raw row shapes and their conversion into model records.

use chrono::{DateTime, Utc};
use valsuite_model::{
    EntityKey, Fingerprint, JobHandle, JobResult, JobStatus, Metric, RunId,
    RunStatus, ScenarioKey, ValidationRun,
};

use super::error::{StoreError, StoreResult};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: i64,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub status: String,
    pub total_jobs: i64,
    pub successful_jobs: i64,
    pub failed_jobs: i64,
}

impl TryFrom<RunRow> for ValidationRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> StoreResult<Self> {
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let fingerprint = Fingerprint::new(row.fingerprint).map_err(|e| {
            StoreError::Corrupt(format!("run {}: {e}", row.run_id))
        })?;
        Ok(ValidationRun {
            run_id: RunId(row.run_id),
            started_at: row.timestamp,
            fingerprint,
            status,
            total_jobs: from_count(row.total_jobs),
            successful_jobs: from_count(row.successful_jobs),
            failed_jobs: from_count(row.failed_jobs),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub run_id: i64,
    pub entity: String,
    pub scenario: String,
    pub handle: String,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobResult {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(JobResult {
            run_id: RunId(row.run_id),
            entity: entity_key(row.entity)?,
            scenario: scenario_key(row.scenario)?,
            handle: JobHandle::new(row.handle),
            status,
            submitted_at: row.submitted_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MetricRow {
    pub run_id: i64,
    pub entity: String,
    pub scenario: String,
    pub handle: String,
    pub element_label: String,
    pub year: i64,
    pub value: f64,
}

impl TryFrom<MetricRow> for Metric {
    type Error = StoreError;

    fn try_from(row: MetricRow) -> StoreResult<Self> {
        Ok(Metric {
            run_id: RunId(row.run_id),
            entity: entity_key(row.entity)?,
            scenario: scenario_key(row.scenario)?,
            handle: JobHandle::new(row.handle),
            element_label: row.element_label,
            year: row.year,
            value: row.value,
        })
    }
}

pub(crate) fn entity_key(raw: String) -> StoreResult<EntityKey> {
    EntityKey::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn scenario_key(raw: String) -> StoreResult<ScenarioKey> {
    ScenarioKey::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn to_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
