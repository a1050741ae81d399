use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use valsuite_model::{JobHandle, MetricRecord, RemoteStatus};

use super::{
    AnalyticsQuery, RemoteConfig, RemoteError, RemoteJobClient, SubmittedJob,
    analytics::parse_metric_records, ulid::extract_ulid,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: Option<String>,
    #[serde(default)]
    job_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    job_status: Option<String>,
    #[serde(default)]
    results_path: Option<String>,
}

/// [`RemoteJobClient`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpComputeClient {
    http: reqwest::Client,
    api_base: Url,
    analytics_base: Url,
    config: RemoteConfig,
    query: AnalyticsQuery,
}

impl HttpComputeClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("valsuite/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_base: parse_base(&config.api_base_url)?,
            analytics_base: parse_base(&config.analytics_base_url)?,
            config: config.clone(),
            query: AnalyticsQuery::default(),
        })
    }

    pub fn with_analytics_query(mut self, query: AnalyticsQuery) -> Self {
        self.query = query;
        self
    }

    async fn rejected(response: reqwest::Response) -> RemoteError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        RemoteError::Rejected { status, body }
    }
}

fn parse_base(raw: &str) -> Result<Url, RemoteError> {
    Url::parse(raw).map_err(|e| {
        RemoteError::Malformed(format!("invalid base url '{raw}': {e}"))
    })
}

/// Appends path segments to `base`, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| {
            RemoteError::Malformed(format!("base url '{base}' cannot carry a path"))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait::async_trait]
impl RemoteJobClient for HttpComputeClient {
    async fn submit_job(
        &self,
        document: &Value,
        environment: &str,
    ) -> Result<SubmittedJob, RemoteError> {
        let url = endpoint(&self.api_base, &["run", environment])?;
        debug!(%url, environment, "submitting job");

        let response = self
            .http
            .post(url)
            .json(document)
            .timeout(self.config.submit_timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        let job_id = body
            .job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| RemoteError::Malformed("missing jobId".to_string()))?;

        let job = SubmittedJob {
            handle: JobHandle::new(job_id),
            job_name: body.job_name.unwrap_or_default(),
        };
        info!(handle = %job.handle, job_name = %job.job_name, "job submitted");
        Ok(job)
    }

    async fn poll_status(&self, handle: &JobHandle) -> RemoteStatus {
        let url = match endpoint(&self.api_base, &["status", handle.as_str()]) {
            Ok(url) => url,
            Err(e) => {
                warn!(%handle, error = %e, "cannot build status url");
                return RemoteStatus::Unknown;
            }
        };

        let response = match self
            .http
            .get(url)
            .timeout(self.config.status_timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(%handle, error = %e, "status probe failed");
                return RemoteStatus::Unknown;
            }
        };

        if !response.status().is_success() {
            debug!(%handle, status = %response.status(), "status probe rejected");
            return RemoteStatus::Unknown;
        }

        match response.json::<StatusResponse>().await {
            Ok(body) => {
                let status = body
                    .job_status
                    .as_deref()
                    .map(RemoteStatus::from_wire)
                    .unwrap_or(RemoteStatus::Unknown);
                if let Some(path) = body.results_path.filter(|_| status.is_terminal()) {
                    debug!(%handle, results_path = %path, "job results available");
                }
                status
            }
            Err(e) => {
                debug!(%handle, error = %e, "unreadable status body");
                RemoteStatus::Unknown
            }
        }
    }

    async fn fetch_analytics(
        &self,
        job: &SubmittedJob,
        environment: &str,
    ) -> Result<Vec<MetricRecord>, RemoteError> {
        let ulid =
            extract_ulid(&job.job_name, &self.config.job_name_prefix, environment)
                .ok_or_else(|| RemoteError::MissingAnalyticsId(job.job_name.clone()))?;
        let url = endpoint(&self.analytics_base, &["analytics", environment, ulid])?;
        debug!(%url, ulid, "fetching analytics");

        let response = self
            .http
            .get(url)
            .query(&self.query.to_params())
            .timeout(self.config.analytics_timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        let records = parse_metric_records(&body)?;
        info!(handle = %job.handle, ulid, records = records.len(), "fetched analytics");
        Ok(records)
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        let url = endpoint(&self.api_base, &["docs"])?;
        let response = self
            .http
            .get(url)
            .timeout(self.config.health_timeout())
            .send()
            .await?;

        if response.status().is_success() {
            info!("remote service is reachable");
            Ok(())
        } else {
            Err(Self::rejected(response).await)
        }
    }
}
