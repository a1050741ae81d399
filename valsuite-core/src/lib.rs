//! # valsuite-core
//!
//! Incremental validation orchestration over a large (entity x scenario)
//! space of work units.
//!
//! ## Overview
//!
//! A validation run determines which units are stale relative to the current
//! [`Fingerprint`](valsuite_model::Fingerprint), dispatches them to a remote
//! compute service under a concurrency cap, polls them to completion or
//! timeout, and records every transition so the next invocation can skip
//! satisfied work.
//!
//! ## Architecture
//!
//! - [`fingerprint`]: sources of the revision marker used for staleness
//! - [`store`]: the embedded SQLite result store and its staleness predicate
//! - [`remote`]: the compute/analytics service client
//! - [`overrides`]: addressed patching of JSON model documents
//! - [`inputs`]: model, entity list, and scenario catalogue loading
//! - [`planner`]: selection of stale units grouped by scenario
//! - [`orchestrator`]: the per-scenario state machine and run accounting
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use valsuite_core::{
//!     fingerprint::GitRevision,
//!     inputs::{InputPaths, InputSet, Selection},
//!     orchestrator::{Orchestrator, OrchestratorConfig},
//!     remote::HttpComputeClient,
//!     store::ResultStore,
//! };
//!
//! async fn validate() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::default();
//!     let store = ResultStore::open("validation_results.db").await?;
//!     let client = Arc::new(HttpComputeClient::new(&config.remote)?);
//!     let inputs = InputSet::load(&InputPaths::default(), &Selection::default())?;
//!
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         store,
//!         client,
//!         Arc::new(GitRevision::new(".")),
//!     );
//!     let report = orchestrator.run(&inputs, false).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod inputs;
pub mod orchestrator;
pub mod overrides;
pub mod planner;
pub mod remote;
pub mod store;

pub use error::{OrchestratorError, Result};

pub use valsuite_model as model;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
