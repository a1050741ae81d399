//! The per-scenario state machine.
//!
//! A scenario group moves `Planned -> Preparing -> Submitting -> Polling ->
//! Recording -> Done`. Groups larger than the concurrency cap run the last
//! three states once per batch, each batch with its own budget.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info, info_span, warn};
use valsuite_model::{
    EntityKey, JobHandle, JobResult, JobStatus, RemoteStatus, RunId, ScenarioKey,
};

use super::{Orchestrator, prepare::prepare_document};
use crate::{
    inputs::ScenarioDocument,
    remote::SubmittedJob,
    store::{RunLock, StoreResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupState {
    Planned,
    Preparing,
    Submitting,
    Polling,
    Recording,
    Done,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroupState::Planned => "planned",
            GroupState::Preparing => "preparing",
            GroupState::Submitting => "submitting",
            GroupState::Polling => "polling",
            GroupState::Recording => "recording",
            GroupState::Done => "done",
        };
        f.write_str(label)
    }
}

/// Outcome counts of one scenario group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub scenario: ScenarioKey,
    pub batches: usize,
    pub units: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub submission_failures: u64,
    pub preparation_failures: u64,
    /// Successful jobs whose metrics could not be fetched.
    pub analytics_failures: u64,
    pub metrics_stored: u64,
}

impl GroupReport {
    fn new(scenario: &ScenarioKey) -> Self {
        Self {
            scenario: scenario.clone(),
            batches: 0,
            units: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            submission_failures: 0,
            preparation_failures: 0,
            analytics_failures: 0,
            metrics_stored: 0,
        }
    }

    /// Every terminal status other than success.
    pub fn failures(&self) -> u64 {
        self.failed + self.timed_out + self.submission_failures + self.preparation_failures
    }
}

struct Prepared {
    entity: EntityKey,
    document: Value,
}

/// A submitted unit as it moves through polling.
struct Slot {
    entity: EntityKey,
    job: SubmittedJob,
    submitted_at: DateTime<Utc>,
    outcome: Option<(RemoteStatus, DateTime<Utc>)>,
}

impl Orchestrator {
    pub(crate) async fn run_group(
        &self,
        run_id: RunId,
        model: &Value,
        scenario: &ScenarioDocument,
        entities: &[EntityKey],
        lock: &mut RunLock,
    ) -> StoreResult<GroupReport> {
        let mut report = GroupReport::new(&scenario.key);
        report.units = entities.len() as u64;
        transition(&scenario.key, GroupState::Planned);
        self.store.renew_run_lock(lock).await?;

        transition(&scenario.key, GroupState::Preparing);
        let prepared = self.prepare(run_id, model, scenario, entities, &mut report).await?;

        for (index, batch) in prepared.chunks(self.config.batch_size()).enumerate() {
            if index > 0 {
                self.store.renew_run_lock(lock).await?;
            }
            let span = info_span!(
                "scenario_group",
                scenario = %scenario.key,
                batch = index
            );
            self.run_batch(run_id, &scenario.key, batch, &mut report)
                .instrument(span)
                .await?;
            report.batches += 1;
        }

        transition(&scenario.key, GroupState::Done);
        info!(
            scenario = %scenario.key,
            succeeded = report.succeeded,
            failed = report.failures(),
            analytics_failures = report.analytics_failures,
            "scenario group finished"
        );
        Ok(report)
    }

    async fn prepare(
        &self,
        run_id: RunId,
        model: &Value,
        scenario: &ScenarioDocument,
        entities: &[EntityKey],
        report: &mut GroupReport,
    ) -> StoreResult<Vec<Prepared>> {
        let mut prepared = Vec::with_capacity(entities.len());
        for entity in entities {
            match prepare_document(model, scenario, entity, &self.config.entity_parameter) {
                Ok((document, _)) => prepared.push(Prepared {
                    entity: entity.clone(),
                    document,
                }),
                Err(e) => {
                    warn!(
                        %entity,
                        scenario = %scenario.key,
                        error = %e,
                        "failed to prepare document; dropping entity from group"
                    );
                    let now = Utc::now();
                    self.store
                        .record_job_result(&JobResult {
                            run_id,
                            entity: entity.clone(),
                            scenario: scenario.key.clone(),
                            handle: JobHandle::none(),
                            status: JobStatus::FailedPreparation,
                            submitted_at: Some(now),
                            completed_at: Some(now),
                        })
                        .await?;
                    report.preparation_failures += 1;
                }
            }
        }
        Ok(prepared)
    }

    async fn run_batch(
        &self,
        run_id: RunId,
        scenario: &ScenarioKey,
        batch: &[Prepared],
        report: &mut GroupReport,
    ) -> StoreResult<()> {
        let environment = self.config.environment.as_str();

        transition(scenario, GroupState::Submitting);
        let deadline = Instant::now() + self.config.group_timeout();
        let mut slots = Vec::with_capacity(batch.len());

        for unit in batch {
            let submitted_at = Utc::now();
            match self.client.submit_job(&unit.document, environment).await {
                Ok(job) => {
                    self.store
                        .record_job_result(&JobResult {
                            run_id,
                            entity: unit.entity.clone(),
                            scenario: scenario.clone(),
                            handle: job.handle.clone(),
                            status: JobStatus::Submitted,
                            submitted_at: Some(submitted_at),
                            completed_at: None,
                        })
                        .await?;
                    slots.push(Slot {
                        entity: unit.entity.clone(),
                        job,
                        submitted_at,
                        outcome: None,
                    });
                }
                Err(e) => {
                    warn!(entity = %unit.entity, error = %e, "submission failed");
                    self.store
                        .record_job_result(&JobResult {
                            run_id,
                            entity: unit.entity.clone(),
                            scenario: scenario.clone(),
                            handle: JobHandle::none(),
                            status: JobStatus::FailedSubmission,
                            submitted_at: Some(submitted_at),
                            completed_at: Some(Utc::now()),
                        })
                        .await?;
                    report.submission_failures += 1;
                }
            }
        }

        transition(scenario, GroupState::Polling);
        self.poll_until_settled(&mut slots, deadline).await;

        transition(scenario, GroupState::Recording);
        for slot in &slots {
            self.record_slot(run_id, scenario, slot, report).await?;
        }
        Ok(())
    }

    /// Polls every active slot once per round until all are terminal or the
    /// deadline passes. Unknown answers leave a slot active.
    async fn poll_until_settled(&self, slots: &mut [Slot], deadline: Instant) {
        let interval = self.config.poll_interval();
        let mut round = 0u64;

        loop {
            round += 1;
            let mut active = 0usize;
            for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
                let status = self.client.poll_status(&slot.job.handle).await;
                if status.is_terminal() {
                    debug!(entity = %slot.entity, handle = %slot.job.handle, %status, "job settled");
                    slot.outcome = Some((status, Utc::now()));
                } else {
                    active += 1;
                }
            }

            if active == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(active, round, "batch budget exhausted");
                break;
            }
            debug!(active, round, "waiting for active jobs");
            sleep(interval.min(deadline - now)).await;
        }
    }

    async fn record_slot(
        &self,
        run_id: RunId,
        scenario: &ScenarioKey,
        slot: &Slot,
        report: &mut GroupReport,
    ) -> StoreResult<()> {
        let (status, completed_at) = match slot.outcome {
            Some((remote, at)) => (
                remote.terminal_job_status().unwrap_or(JobStatus::Failed),
                at,
            ),
            None => (JobStatus::Timeout, Utc::now()),
        };

        self.store
            .record_job_result(&JobResult {
                run_id,
                entity: slot.entity.clone(),
                scenario: scenario.clone(),
                handle: slot.job.handle.clone(),
                status,
                submitted_at: Some(slot.submitted_at),
                completed_at: Some(completed_at),
            })
            .await?;

        match status {
            JobStatus::Success => {
                report.succeeded += 1;
                self.record_metrics(run_id, scenario, slot, report).await?;
            }
            JobStatus::Timeout => {
                warn!(entity = %slot.entity, handle = %slot.job.handle, "job timed out");
                report.timed_out += 1;
            }
            _ => {
                warn!(entity = %slot.entity, handle = %slot.job.handle, "job failed");
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Analytics failures never demote a successful job.
    async fn record_metrics(
        &self,
        run_id: RunId,
        scenario: &ScenarioKey,
        slot: &Slot,
        report: &mut GroupReport,
    ) -> StoreResult<()> {
        let records = match self
            .client
            .fetch_analytics(&slot.job, &self.config.environment)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    entity = %slot.entity,
                    handle = %slot.job.handle,
                    error = %e,
                    "analytics fetch failed; job stays successful without metrics"
                );
                report.analytics_failures += 1;
                return Ok(());
            }
        };

        report.metrics_stored += self
            .store
            .store_metrics(run_id, &slot.entity, scenario, &slot.job.handle, &records)
            .await?;
        Ok(())
    }
}

fn transition(scenario: &ScenarioKey, state: GroupState) {
    debug!(%scenario, %state, "scenario group state");
}
