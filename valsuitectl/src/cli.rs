use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use valsuite_core::inputs::Selection;

use crate::config::ValsuiteConfig;

#[derive(Debug, Parser)]
#[command(
    name = "valsuitectl",
    version,
    about = "Incremental validation runs against the remote compute service"
)]
pub struct Cli {
    /// Raise the default log level to debug (RUST_LOG still wins)
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// SQLite datastore file
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit every stale (entity, scenario) pair and record the outcomes
    Run(RunArgs),
    /// Show what `run` would submit, without contacting the remote service
    Plan(SelectionArgs),
    /// Show the counts and non-successful units of a recorded run
    Status {
        /// Run id; defaults to the most recent run
        #[arg(long)]
        run: Option<i64>,
    },
    /// Execute a read-only SQL statement against the datastore
    Query {
        sql: String,
        #[arg(long, value_enum, default_value_t = QueryFormat::Table)]
        format: QueryFormat,
    },
    /// Delete all but the most recent runs
    Prune {
        #[arg(long)]
        keep: u32,
    },
    /// Probe the remote compute service
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Args)]
pub struct SelectionArgs {
    /// Entity keys to consider (comma separated); all when omitted
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub entities: Vec<String>,
    /// Scenario keys to consider (comma separated); all when omitted
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub scenarios: Vec<String>,
    /// Treat every selected pair as stale
    #[arg(long)]
    pub force: bool,
    /// Base model document
    #[arg(long)]
    pub model: Option<PathBuf>,
    /// Entity catalogue
    #[arg(long)]
    pub entities_file: Option<PathBuf>,
    /// Directory of scenario documents
    #[arg(long)]
    pub scenarios_dir: Option<PathBuf>,
    /// Use this revision marker instead of the git HEAD
    #[arg(long)]
    pub fingerprint: Option<String>,
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

impl SelectionArgs {
    pub fn selection(&self) -> Selection {
        Selection {
            entities: self.entities.clone(),
            scenarios: self.scenarios.clone(),
        }
    }

    pub fn apply(&self, config: &mut ValsuiteConfig) {
        if let Some(model) = &self.model {
            config.inputs.model = model.clone();
        }
        if let Some(entities) = &self.entities_file {
            config.inputs.entities = entities.clone();
        }
        if let Some(dir) = &self.scenarios_dir {
            config.inputs.scenarios_dir = dir.clone();
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// Remote environment to submit to
    #[arg(long)]
    pub environment: Option<String>,
    /// Maximum number of outstanding remote jobs
    #[arg(long)]
    pub max_concurrent: Option<usize>,
    /// Pause between polling rounds, e.g. `3s`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,
    /// Wall-clock budget per batch, e.g. `2h`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
    /// Do not probe the remote service before opening a run
    #[arg(long)]
    pub skip_health_check: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut ValsuiteConfig) {
        self.selection.apply(config);
        let orchestrator = &mut config.orchestrator;
        if let Some(environment) = &self.environment {
            orchestrator.environment = environment.clone();
        }
        if let Some(cap) = self.max_concurrent {
            orchestrator.max_concurrent_jobs = cap;
        }
        if let Some(interval) = self.poll_interval {
            orchestrator.poll_interval_ms = millis(interval);
        }
        if let Some(timeout) = self.timeout {
            orchestrator.group_timeout_ms = millis(timeout);
        }
        if self.skip_health_check {
            orchestrator.health_check = false;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_loaded_config() {
        let cli = Cli::try_parse_from([
            "valsuitectl",
            "run",
            "--entities",
            "KEN,UGA",
            "--scenarios",
            "base",
            "--environment",
            "staging",
            "--max-concurrent",
            "5",
            "--poll-interval",
            "500ms",
            "--timeout",
            "1h 30m",
            "--skip-health-check",
            "--database",
            "other.db",
        ])
        .expect("parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cli.database, Some(PathBuf::from("other.db")));
        assert_eq!(args.selection.selection().entities, ["KEN", "UGA"]);

        let mut config = ValsuiteConfig::default();
        args.apply(&mut config);
        let orchestrator = &config.orchestrator;
        assert_eq!(orchestrator.environment, "staging");
        assert_eq!(orchestrator.max_concurrent_jobs, 5);
        assert_eq!(orchestrator.poll_interval_ms, 500);
        assert_eq!(orchestrator.group_timeout_ms, 90 * 60 * 1000);
        assert!(!orchestrator.health_check);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let cli = Cli::try_parse_from(["valsuitectl", "run"]).expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = ValsuiteConfig::default();
        args.apply(&mut config);
        assert_eq!(config, ValsuiteConfig::default());
    }

    #[test]
    fn bad_durations_are_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["valsuitectl", "run", "--timeout", "soon"]).is_err());
    }
}
