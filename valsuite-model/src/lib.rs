//! Value types shared across the valsuite crates.
#![allow(missing_docs)]

pub mod error;
pub mod keys;
pub mod records;
pub mod status;

pub use chrono;

pub use error::{ModelError, Result as ModelResult};
pub use keys::{EntityKey, Fingerprint, JobHandle, RunId, ScenarioKey};
pub use records::{JobResult, Metric, MetricRecord, Unit, ValidationRun};
pub use status::{JobStatus, RemoteStatus, RunStatus};
