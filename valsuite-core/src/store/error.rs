use chrono::{DateTime, Utc};
use thiserror::Error;
use valsuite_model::{RunId, RunStatus};

/// Failures of the embedded result store. Every variant is fatal to the
/// invocation that hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to apply schema migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("validation run {0} does not exist")]
    RunNotFound(RunId),

    #[error("validation run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("result store is locked by '{holder}' since {since}")]
    Locked {
        holder: String,
        since: DateTime<Utc>,
    },

    #[error("run lock held by '{owner}' was taken over by another invocation")]
    LockLost { owner: String },

    #[error("query rejected: {0}")]
    RejectedQuery(String),

    #[error("corrupt row in result store: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
