use chrono::{DateTime, Utc};

use crate::{
    keys::{EntityKey, Fingerprint, JobHandle, RunId, ScenarioKey},
    status::{JobStatus, RunStatus},
};

/// One invocation of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidationRun {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub status: RunStatus,
    pub total_jobs: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
}

/// Outcome of one (run, entity, scenario) unit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobResult {
    pub run_id: RunId,
    pub entity: EntityKey,
    pub scenario: ScenarioKey,
    pub handle: JobHandle,
    pub status: JobStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single (element, year) measurement as returned by the analytics
/// service, before it is attached to a unit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricRecord {
    pub element_label: String,
    pub year: i64,
    pub value: f64,
}

/// A stored measurement produced by a successful job.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metric {
    pub run_id: RunId,
    pub entity: EntityKey,
    pub scenario: ScenarioKey,
    pub handle: JobHandle,
    pub element_label: String,
    pub year: i64,
    pub value: f64,
}

/// One schedulable (entity, scenario) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Unit {
    pub entity: EntityKey,
    pub scenario: ScenarioKey,
}

impl Unit {
    pub fn new(entity: EntityKey, scenario: ScenarioKey) -> Self {
        Self { entity, scenario }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity, self.scenario)
    }
}
