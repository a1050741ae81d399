//! Top-level validation control loop.
//!
//! One [`Orchestrator::run`] call is one validation run: fingerprint, plan,
//! then each scenario group in plan order, then a single terminal status
//! update. Groups run to completion one after another, so at most one
//! batch (bounded by `max_concurrent_jobs`) is ever outstanding remotely.

mod config;
mod group;
mod prepare;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;
use valsuite_model::{EntityKey, Fingerprint, RunId, RunStatus};

pub use config::{AnalyticsQuery, FilterValue, OrchestratorConfig, RemoteConfig};
pub use group::GroupReport;
pub use prepare::{PreparationError, prepare_document};

use crate::{
    error::{OrchestratorError, Result},
    fingerprint::FingerprintSource,
    inputs::{InputError, InputSet, ScenarioDocument},
    planner::{Plan, RerunPlanner},
    remote::RemoteJobClient,
    store::{ResultStore, RunLock, StoreResult},
};

/// Aggregate job counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing was stale; no run was recorded.
    UpToDate,
    Finished {
        run_id: RunId,
        status: RunStatus,
        totals: RunTotals,
        groups: Vec<GroupReport>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self.outcome, RunOutcome::UpToDate)
    }

    pub fn has_failures(&self) -> bool {
        match &self.outcome {
            RunOutcome::UpToDate => false,
            RunOutcome::Finished { totals, .. } => totals.failed > 0,
        }
    }

    pub fn summary(&self) -> String {
        match &self.outcome {
            RunOutcome::UpToDate => format!(
                "up to date at {}: nothing to run",
                self.fingerprint.short()
            ),
            RunOutcome::Finished {
                run_id,
                status,
                totals,
                ..
            } => format!(
                "run {run_id} {status}: {} jobs, {} succeeded, {} failed",
                totals.total, totals.succeeded, totals.failed
            ),
        }
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: ResultStore,
    client: Arc<dyn RemoteJobClient>,
    fingerprints: Arc<dyn FingerprintSource>,
    owner: String,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: ResultStore,
        client: Arc<dyn RemoteJobClient>,
        fingerprints: Arc<dyn FingerprintSource>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            fingerprints,
            owner: format!("pid{}-{}", std::process::id(), Uuid::now_v7()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Dry run: the stale units for the current fingerprint, without
    /// touching the remote service or opening a run.
    pub async fn plan(&self, inputs: &InputSet, force: bool) -> Result<(Fingerprint, Plan)> {
        let fingerprint = self.fingerprints.current().await?;
        let plan = RerunPlanner::new(self.store.clone())
            .plan(
                &inputs.entity_keys(),
                &inputs.scenario_keys(),
                &fingerprint,
                force,
            )
            .await?;
        Ok((fingerprint, plan))
    }

    pub async fn run(&self, inputs: &InputSet, force: bool) -> Result<RunReport> {
        let (fingerprint, plan) = self.plan(inputs, force).await?;
        self.run_plan(inputs, fingerprint, plan).await
    }

    /// Executes a plan computed earlier by [`Orchestrator::plan`]. Every
    /// planned scenario must be present in `inputs`; otherwise nothing is
    /// submitted and no run is opened.
    pub async fn run_plan(
        &self,
        inputs: &InputSet,
        fingerprint: Fingerprint,
        plan: Plan,
    ) -> Result<RunReport> {
        if plan.is_empty() {
            info!(fingerprint = fingerprint.short(), "up to date; nothing to run");
            return Ok(RunReport {
                fingerprint,
                outcome: RunOutcome::UpToDate,
            });
        }
        let groups = resolve_groups(inputs, plan)?;

        if self.config.health_check {
            self.client
                .health_check()
                .await
                .map_err(OrchestratorError::Unhealthy)?;
        }

        let mut lock = self
            .store
            .acquire_run_lock(&self.owner, self.config.lock_stale_after())
            .await?;
        let outcome = self
            .execute(&inputs.model, &fingerprint, groups, &mut lock)
            .await;

        match (outcome, self.store.release_run_lock(&lock).await) {
            (Ok(outcome), Ok(())) => Ok(RunReport {
                fingerprint,
                outcome,
            }),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), released) => {
                if let Err(release_err) = released {
                    warn!(error = %release_err, "failed to release run lock");
                }
                Err(e.into())
            }
        }
    }

    async fn execute(
        &self,
        model: &Value,
        fingerprint: &Fingerprint,
        groups: Vec<ResolvedGroup<'_>>,
        lock: &mut RunLock,
    ) -> StoreResult<RunOutcome> {
        let total = groups.iter().map(|g| g.entities.len() as u64).sum();
        let run_id = self.store.start_run(fingerprint, total).await?;

        let mut reports = Vec::with_capacity(groups.len());
        let mut totals = RunTotals {
            total,
            ..RunTotals::default()
        };

        for group in groups {
            let report = self
                .run_group(run_id, model, group.scenario, &group.entities, lock)
                .await?;
            totals.succeeded += report.succeeded;
            totals.failed += report.failures();
            reports.push(report);
        }

        let status = RunStatus::from_failures(totals.failed);
        self.store
            .update_run_status(run_id, status, totals.succeeded, totals.failed)
            .await?;

        info!(
            %run_id,
            %status,
            total = totals.total,
            succeeded = totals.succeeded,
            failed = totals.failed,
            "validation run finished"
        );
        Ok(RunOutcome::Finished {
            run_id,
            status,
            totals,
            groups: reports,
        })
    }
}

/// A planned group paired with its scenario document.
struct ResolvedGroup<'a> {
    scenario: &'a ScenarioDocument,
    entities: Vec<EntityKey>,
}

fn resolve_groups(inputs: &InputSet, plan: Plan) -> Result<Vec<ResolvedGroup<'_>>> {
    let mut missing = Vec::new();
    let mut resolved = Vec::with_capacity(plan.groups().len());
    for group in plan.into_groups() {
        match inputs.scenario(&group.scenario) {
            Some(scenario) => resolved.push(ResolvedGroup {
                scenario,
                entities: group.entities,
            }),
            None => missing.push(group.scenario.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(InputError::UnknownScenarios(missing).into());
    }
    Ok(resolved)
}
