use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};
use valsuite_core::{
    fingerprint::{FingerprintSource, GitRevision, StaticFingerprint},
    inputs::InputSet,
    orchestrator::Orchestrator,
    planner::RerunPlanner,
    remote::{HttpComputeClient, RemoteJobClient},
    store::{ResultStore, StoreError},
};
use valsuite_model::{Fingerprint, RunId};

use crate::{
    cli::{QueryFormat, RunArgs, SelectionArgs},
    config::{ConfigLoadError, ValsuiteConfig},
    output,
};

/// How a successfully executed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    JobsFailed,
}

fn fingerprint_source(explicit: Option<&str>) -> Result<Arc<dyn FingerprintSource>> {
    match explicit {
        Some(raw) => {
            let fingerprint = Fingerprint::new(raw).context("invalid --fingerprint")?;
            Ok(Arc::new(StaticFingerprint::new(fingerprint)))
        }
        None => Ok(Arc::new(GitRevision::new("."))),
    }
}

fn http_client(config: &ValsuiteConfig) -> Result<HttpComputeClient, ConfigLoadError> {
    HttpComputeClient::new(&config.orchestrator.remote)
        .map(|client| client.with_analytics_query(config.orchestrator.analytics.clone()))
        .map_err(|err| ConfigLoadError::Invalid(format!("remote service: {err}")))
}

async fn open_existing(path: &Path) -> Result<ResultStore> {
    ResultStore::open_existing(path)
        .await
        .with_context(|| format!("failed to open datastore {}", path.display()))
}

pub async fn run(mut config: ValsuiteConfig, args: &RunArgs) -> Result<Completion> {
    args.apply(&mut config);
    config.validate()?;

    let inputs = InputSet::load(&config.inputs, &args.selection.selection())?;
    let fingerprints = fingerprint_source(args.selection.fingerprint.as_deref())?;
    let client = http_client(&config)?;
    let store = ResultStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open datastore {}", config.database.display()))?;

    debug!(
        environment = %config.orchestrator.environment,
        max_concurrent_jobs = config.orchestrator.max_concurrent_jobs,
        "starting validation run"
    );
    let orchestrator = Orchestrator::new(
        config.orchestrator,
        store.clone(),
        Arc::new(client),
        fingerprints,
    );
    let result = orchestrator.run(&inputs, args.selection.force).await;
    store.close().await;
    let report = result?;

    if args.selection.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", output::render_report(&report));
    }

    Ok(if report.has_failures() {
        Completion::JobsFailed
    } else {
        Completion::Clean
    })
}

pub async fn plan(mut config: ValsuiteConfig, args: &SelectionArgs) -> Result<Completion> {
    args.apply(&mut config);
    config.validate()?;

    let inputs = InputSet::load(&config.inputs, &args.selection())?;
    let fingerprint = fingerprint_source(args.fingerprint.as_deref())?
        .current()
        .await?;
    let store = ResultStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open datastore {}", config.database.display()))?;

    let plan = RerunPlanner::new(store.clone())
        .plan(
            &inputs.entity_keys(),
            &inputs.scenario_keys(),
            &fingerprint,
            args.force,
        )
        .await;
    store.close().await;
    let plan = plan?;

    if args.json {
        let body = json!({
            "fingerprint": fingerprint,
            "total_units": plan.total_units(),
            "groups": plan.groups(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", output::render_plan(&fingerprint, &plan));
    }
    Ok(Completion::Clean)
}

pub async fn status(config: &ValsuiteConfig, run: Option<i64>) -> Result<Completion> {
    let store = open_existing(&config.database).await?;

    let run = match run {
        Some(id) => {
            let run_id = RunId(id);
            Some(
                store
                    .get_run(run_id)
                    .await?
                    .ok_or(StoreError::RunNotFound(run_id))?,
            )
        }
        None => store.latest_run().await?,
    };
    let Some(run) = run else {
        store.close().await;
        println!("no runs recorded in {}", config.database.display());
        return Ok(Completion::Clean);
    };

    let failed = store.get_failed_jobs(run.run_id).await?;
    store.close().await;

    let body = json!({
        "run": run,
        "failed_units": failed,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(Completion::Clean)
}

pub async fn query(config: &ValsuiteConfig, sql: &str, format: QueryFormat) -> Result<Completion> {
    let store = open_existing(&config.database).await?;
    let rows = store.query_readonly(sql).await;
    store.close().await;
    let rows = rows.context("query failed")?;

    match format {
        QueryFormat::Table => println!("{}", output::render_table(&rows)),
        QueryFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows.to_records())?)
        }
    }
    Ok(Completion::Clean)
}

pub async fn prune(config: &ValsuiteConfig, keep: u32) -> Result<Completion> {
    let store = open_existing(&config.database).await?;
    let removed = store.prune_runs(keep).await;
    store.close().await;
    let removed = removed?;

    info!(removed, keep, "pruned validation runs");
    println!("removed {removed} runs, kept the {keep} most recent");
    Ok(Completion::Clean)
}

pub async fn health(config: &ValsuiteConfig) -> Result<Completion> {
    let client = http_client(config)?;
    client.health_check().await.with_context(|| {
        format!(
            "remote service at {} is not healthy",
            config.orchestrator.remote.api_base_url
        )
    })?;
    println!("remote service at {} is healthy", config.orchestrator.remote.api_base_url);
    Ok(Completion::Clean)
}
