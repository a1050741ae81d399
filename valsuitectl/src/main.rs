//! `valsuitectl`: drive incremental validation runs from the command line.
//!
//! Exit codes: 0 success or nothing to do, 1 the run finished with failed
//! jobs (or an unclassified error), 2 input or configuration error,
//! 3 datastore error (including a held run lock), 4 remote service unhealthy.

mod cli;
mod commands;
mod config;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use valsuite_core::{
    OrchestratorError, fingerprint::FingerprintError, inputs::InputError,
    remote::RemoteError, store::StoreError,
};
use valsuite_model::ModelError;

use crate::{
    cli::{Cli, Command},
    commands::Completion,
    config::{ConfigLoadError, ValsuiteConfig},
};

const EXIT_JOBS_FAILED: u8 = 1;
const EXIT_INPUT: u8 = 2;
const EXIT_STORE: u8 = 3;
const EXIT_UNHEALTHY: u8 = 4;

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<OrchestratorError>() {
            return match err {
                OrchestratorError::Input(_) | OrchestratorError::Fingerprint(_) => EXIT_INPUT,
                OrchestratorError::Store(_) => EXIT_STORE,
                OrchestratorError::Unhealthy(_) => EXIT_UNHEALTHY,
            };
        }
        if cause.is::<ConfigLoadError>()
            || cause.is::<InputError>()
            || cause.is::<FingerprintError>()
            || cause.is::<ModelError>()
        {
            return EXIT_INPUT;
        }
        if cause.is::<StoreError>() {
            return EXIT_STORE;
        }
        if cause.is::<RemoteError>() {
            return EXIT_UNHEALTHY;
        }
    }
    EXIT_JOBS_FAILED
}

async fn dispatch(cli: Cli) -> anyhow::Result<Completion> {
    let (mut config, source) = ValsuiteConfig::load_from_env()?;
    debug!(%source, "configuration loaded");
    if let Some(database) = cli.database {
        config.database = database;
    }

    match cli.command {
        Command::Run(args) => commands::run(config, &args).await,
        Command::Plan(args) => commands::plan(config, &args).await,
        Command::Status { run } => commands::status(&config, run).await,
        Command::Query { sql, format } => commands::query(&config, &sql, format).await,
        Command::Prune { keep } => commands::prune(&config, keep).await,
        Command::Health => commands::health(&config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match dispatch(cli).await {
        Ok(Completion::Clean) => ExitCode::SUCCESS,
        Ok(Completion::JobsFailed) => ExitCode::from(EXIT_JOBS_FAILED),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
