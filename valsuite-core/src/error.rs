use thiserror::Error;

use crate::{
    fingerprint::FingerprintError, inputs::InputError, remote::RemoteError,
    store::StoreError,
};

/// Errors that abort a whole invocation. Per-unit failures (submission,
/// polling, analytics) never surface here; they are recorded as job
/// outcomes instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("remote service health check failed: {0}")]
    Unhealthy(#[source] RemoteError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
