//! Client side of the remote compute and analytics services.
//!
//! [`RemoteJobClient`] is the seam the orchestrator drives. Submission and
//! analytics failures come back as [`RemoteError`] values so a single unit
//! can be marked failed without aborting its batch; polling never fails and
//! reports [`RemoteStatus::Unknown`] instead.

mod analytics;
mod config;
mod http;
mod ulid;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use valsuite_model::{JobHandle, MetricRecord, RemoteStatus};

pub use analytics::parse_metric_records;
pub use config::{AnalyticsQuery, FilterValue, RemoteConfig};
pub use http::HttpComputeClient;
pub use ulid::extract_ulid;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote service rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no analytics identifier in job name '{0}'")]
    MissingAnalyticsId(String),
}

/// What the compute service hands back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub handle: JobHandle,
    /// Service-derived name; carries the analytics identifier.
    pub job_name: String,
}

#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    async fn submit_job(
        &self,
        document: &Value,
        environment: &str,
    ) -> Result<SubmittedJob, RemoteError>;

    /// One status probe. Transport problems and unrecognised answers map to
    /// [`RemoteStatus::Unknown`].
    async fn poll_status(&self, handle: &JobHandle) -> RemoteStatus;

    async fn fetch_analytics(
        &self,
        job: &SubmittedJob,
        environment: &str,
    ) -> Result<Vec<MetricRecord>, RemoteError>;

    async fn health_check(&self) -> Result<(), RemoteError>;
}
