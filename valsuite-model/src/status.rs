use std::{fmt, str::FromStr};

use crate::error::ModelError;

/// Lifecycle of a validation run. Only `Running -> Completed | Failed` is a
/// legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Final status for a run that ended with `failed` failed units.
    pub fn from_failures(failed: u64) -> Self {
        if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ModelError::UnknownRunStatus(other.to_string())),
        }
    }
}

/// Persisted outcome of one (run, entity, scenario) unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    /// Accepted by the remote service, not yet terminal.
    Submitted,
    Success,
    Failed,
    Timeout,
    /// The remote service could not be reached or rejected the document.
    FailedSubmission,
    /// The per-entity document could not be built; never sent.
    FailedPreparation,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Submitted,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Timeout,
        JobStatus::FailedSubmission,
        JobStatus::FailedPreparation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::FailedSubmission => "failed_submission",
            JobStatus::FailedPreparation => "failed_preparation",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Submitted)
    }

    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownJobStatus(s.to_string()))
    }
}

/// What the remote compute service reports for a job handle.
///
/// `Unknown` covers transport errors, non-2xx answers and unrecognised
/// enumerators; it carries no information and never moves a job forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum RemoteStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl RemoteStatus {
    /// Maps the service's raw enumerator.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "SUBMITTED" | "PENDING" | "RUNNABLE" | "STARTING" => {
                RemoteStatus::Pending
            }
            "RUNNING" => RemoteStatus::Running,
            "SUCCEEDED" => RemoteStatus::Succeeded,
            "FAILED" => RemoteStatus::Failed,
            _ => RemoteStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteStatus::Succeeded | RemoteStatus::Failed)
    }

    /// The job status recorded for a terminal remote state.
    pub fn terminal_job_status(self) -> Option<JobStatus> {
        match self {
            RemoteStatus::Succeeded => Some(JobStatus::Success),
            RemoteStatus::Failed => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RemoteStatus::Pending => "PENDING",
            RemoteStatus::Running => "RUNNING",
            RemoteStatus::Succeeded => "SUCCEEDED",
            RemoteStatus::Failed => "FAILED",
            RemoteStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_storage_form() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("SUCCESS".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_submitted_is_non_terminal() {
        let open: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(|status| !status.is_terminal())
            .collect();
        assert_eq!(open, vec![JobStatus::Submitted]);
    }

    #[test]
    fn remote_queue_states_collapse_to_pending() {
        for raw in ["SUBMITTED", "PENDING", "RUNNABLE", "STARTING"] {
            assert_eq!(RemoteStatus::from_wire(raw), RemoteStatus::Pending);
        }
        assert_eq!(RemoteStatus::from_wire("RUNNING"), RemoteStatus::Running);
        assert_eq!(RemoteStatus::from_wire("weird"), RemoteStatus::Unknown);
    }

    #[test]
    fn run_status_follows_failure_count() {
        assert_eq!(RunStatus::from_failures(0), RunStatus::Completed);
        assert_eq!(RunStatus::from_failures(3), RunStatus::Failed);
        assert!(!RunStatus::Running.is_terminal());
    }
}
