use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::remote::{AnalyticsQuery, FilterValue, RemoteConfig};

/// Floor of the run lock staleness window (seconds).
const MIN_LOCK_STALE_SECS: u64 = 60;

/// Knobs for one orchestrator invocation.
///
/// Every field has a default so partial configuration files stay valid.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Remote environment name jobs are submitted to.
    pub environment: String,
    /// Upper bound on simultaneously outstanding remote jobs.
    pub max_concurrent_jobs: usize,
    /// Pause between polling rounds (milliseconds).
    pub poll_interval_ms: u64,
    /// Wall-clock budget of one batch, from its first submission (milliseconds).
    pub group_timeout_ms: u64,
    /// Scenario parameter whose value is replaced with the entity key.
    pub entity_parameter: String,
    /// Probe the compute service before opening a run.
    pub health_check: bool,
    /// Time without renewal after which a held run lock is considered
    /// abandoned (seconds). Defaults to three batch budgets, never below a
    /// minute. The lock is renewed at every group and batch boundary.
    pub lock_stale_after_secs: Option<u64>,
    pub remote: RemoteConfig,
    pub analytics: AnalyticsQuery,
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    /// Batch size actually used; a zero cap is treated as one.
    pub fn batch_size(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }

    pub fn lock_stale_after(&self) -> chrono::Duration {
        let secs = self
            .lock_stale_after_secs
            .unwrap_or_else(|| self.group_timeout_ms.div_ceil(1000).saturating_mul(3))
            .max(MIN_LOCK_STALE_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "standard".to_string(),
            max_concurrent_jobs: 100,
            poll_interval_ms: 3_000,
            group_timeout_ms: 2 * 60 * 60 * 1_000,
            entity_parameter: "Country".to_string(),
            health_check: true,
            lock_stale_after_secs: None,
            remote: RemoteConfig::default(),
            analytics: AnalyticsQuery::default(),
        }
    }
}
