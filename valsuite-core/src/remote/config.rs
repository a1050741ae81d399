use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Endpoints and per-call timeouts of the compute and analytics services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base_url: String,
    pub analytics_base_url: String,
    /// Leading part of job names, `{prefix}-{environment}-{ULID}`.
    pub job_name_prefix: String,
    pub submit_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub analytics_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl RemoteConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn analytics_timeout(&self) -> Duration {
        Duration::from_secs(self.analytics_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://microapi.forecasthealth.org".to_string(),
            analytics_base_url: "https://analytics.forecasthealth.org"
                .to_string(),
            job_name_prefix: "botech-sim".to_string(),
            submit_timeout_secs: 60,
            status_timeout_secs: 30,
            analytics_timeout_secs: 30,
            health_timeout_secs: 10,
        }
    }
}

/// A filter value: either a single match or a set (`{key}__in`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

/// Query sent with every analytics fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalyticsQuery {
    pub event_type: String,
    pub group_by: Vec<String>,
    pub group_by_date: String,
    pub aggregations: String,
    pub filters: BTreeMap<String, FilterValue>,
}

impl AnalyticsQuery {
    /// Flattens the query into URL parameters. `group_by` is repeated once
    /// per field.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("event_type".to_string(), self.event_type.clone()),
            ("group_by_date".to_string(), self.group_by_date.clone()),
            ("aggregations".to_string(), self.aggregations.clone()),
        ];
        params.extend(
            self.group_by
                .iter()
                .map(|field| ("group_by".to_string(), field.clone())),
        );
        for (key, value) in &self.filters {
            match value {
                FilterValue::One(v) => params.push((key.clone(), v.clone())),
                FilterValue::Many(values) => {
                    params.push((format!("{key}__in"), values.join(",")))
                }
            }
        }
        params
    }
}

impl Default for AnalyticsQuery {
    fn default() -> Self {
        Self {
            event_type: "ECHO".to_string(),
            group_by: vec!["element_label".to_string()],
            group_by_date: "timestamp:year".to_string(),
            aggregations: "value:last".to_string(),
            filters: BTreeMap::from([(
                "element_label".to_string(),
                FilterValue::One("Healthy Years Lived".to_string()),
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_matches_service_expectations() {
        let params = AnalyticsQuery::default().to_params();
        assert!(params.contains(&("event_type".into(), "ECHO".into())));
        assert!(params.contains(&("group_by".into(), "element_label".into())));
        assert!(
            params.contains(&("group_by_date".into(), "timestamp:year".into()))
        );
        assert!(params.contains(&("aggregations".into(), "value:last".into())));
        assert!(params.contains(&(
            "element_label".into(),
            "Healthy Years Lived".into()
        )));
    }

    #[test]
    fn list_filters_are_comma_joined() {
        let query = AnalyticsQuery {
            group_by: vec!["element_label".into(), "country".into()],
            filters: BTreeMap::from([(
                "element_label".to_string(),
                FilterValue::Many(vec!["A".into(), "B".into()]),
            )]),
            ..AnalyticsQuery::default()
        };
        let params = query.to_params();
        let group_by: Vec<_> =
            params.iter().filter(|(k, _)| k == "group_by").collect();
        assert_eq!(group_by.len(), 2);
        assert!(params.contains(&("element_label__in".into(), "A,B".into())));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"api_base_url": "http://localhost:9000"}"#)
                .expect("config");
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert_eq!(config.job_name_prefix, "botech-sim");
        assert_eq!(config.submit_timeout(), Duration::from_secs(60));
    }
}
