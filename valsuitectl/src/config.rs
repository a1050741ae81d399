//! Layered configuration for the CLI.
//!
//! Resolution order, first hit wins:
//! 1. `$VALSUITE_CONFIG_PATH` (TOML or JSON, chosen by extension)
//! 2. `$VALSUITE_CONFIG_JSON` (inline JSON)
//! 3. `./valsuite.toml`
//! 4. built-in defaults
//!
//! Command-line flags are applied on top of whichever layer was chosen.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use valsuite_core::{inputs::InputPaths, orchestrator::OrchestratorConfig};

pub const CONFIG_PATH_ENV: &str = "VALSUITE_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "VALSUITE_CONFIG_JSON";
pub const DEFAULT_CONFIG_FILE: &str = "valsuite.toml";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config ({origin})")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid TOML config ({origin})")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

/// Which layer produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::EnvPath(path) => {
                write!(f, "{} ({CONFIG_PATH_ENV})", path.display())
            }
            ConfigSource::EnvInline => f.write_str(CONFIG_JSON_ENV),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Default => f.write_str("defaults"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValsuiteConfig {
    /// SQLite datastore file.
    pub database: PathBuf,
    pub inputs: InputPaths,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ValsuiteConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("validation_results.db"),
            inputs: InputPaths::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ValsuiteConfig {
    /// Load `.env` (if any) and then resolve the layers from the process
    /// environment and the working directory.
    pub fn load_from_env() -> Result<(Self, ConfigSource), ConfigLoadError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        let cwd = std::env::current_dir().map_err(|source| ConfigLoadError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Self::resolve(|key| std::env::var(key).ok(), &cwd)
    }

    /// Layer resolution against an arbitrary variable lookup.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        dir: &Path,
    ) -> Result<(Self, ConfigSource), ConfigLoadError> {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let config = Self::parse_json(&raw, CONFIG_JSON_ENV)?;
            return Ok((config, ConfigSource::EnvInline));
        }

        let default_file = dir.join(DEFAULT_CONFIG_FILE);
        if default_file.is_file() {
            let config = Self::load_from_file(&default_file)?;
            return Ok((config, ConfigSource::File(default_file)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents, &origin),
            _ => Self::parse_toml(&contents, &origin),
        }
    }

    fn parse_json(raw: &str, origin: &str) -> Result<Self, ConfigLoadError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|source| ConfigLoadError::Json {
                origin: origin.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn parse_toml(raw: &str, origin: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigLoadError::Toml {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let orchestrator = &self.orchestrator;
        if orchestrator.environment.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(
                "orchestrator.environment must not be empty".into(),
            ));
        }
        if orchestrator.entity_parameter.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(
                "orchestrator.entity_parameter must not be empty".into(),
            ));
        }
        if orchestrator.max_concurrent_jobs == 0 {
            return Err(ConfigLoadError::Invalid(
                "orchestrator.max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if orchestrator.poll_interval_ms == 0 {
            return Err(ConfigLoadError::Invalid(
                "orchestrator.poll_interval_ms must be positive".into(),
            ));
        }
        if self.database.as_os_str().is_empty() {
            return Err(ConfigLoadError::Invalid("database path must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, source) = ValsuiteConfig::resolve(lookup(&[]), dir.path()).expect("load");
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config, ValsuiteConfig::default());
        assert_eq!(config.database, PathBuf::from("validation_results.db"));
    }

    #[test]
    fn default_file_in_working_directory_is_picked_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"
database = "results.db"

[orchestrator]
environment = "staging"
max_concurrent_jobs = 8

[orchestrator.remote]
api_base_url = "http://localhost:9000"
"#,
        )
        .expect("write");

        let (config, source) = ValsuiteConfig::resolve(lookup(&[]), dir.path()).expect("load");
        assert!(matches!(source, ConfigSource::File(_)));
        assert_eq!(config.database, PathBuf::from("results.db"));
        assert_eq!(config.orchestrator.environment, "staging");
        assert_eq!(config.orchestrator.max_concurrent_jobs, 8);
        assert_eq!(config.orchestrator.remote.api_base_url, "http://localhost:9000");
        // untouched sections keep their defaults
        assert_eq!(config.orchestrator.poll_interval_ms, 3000);
        assert_eq!(config.inputs, InputPaths::default());
    }

    #[test]
    fn inline_json_beats_default_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "database = \"file.db\"\n")
            .expect("write");

        let (config, source) = ValsuiteConfig::resolve(
            lookup(&[(CONFIG_JSON_ENV, r#"{"database": "inline.db"}"#)]),
            dir.path(),
        )
        .expect("load");
        assert_eq!(source, ConfigSource::EnvInline);
        assert_eq!(config.database, PathBuf::from("inline.db"));
    }

    #[test]
    fn explicit_path_beats_everything_and_honours_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let json_path = dir.path().join("custom.json");
        fs::write(
            &json_path,
            r#"{"orchestrator": {"entity_parameter": "Region"}}"#,
        )
        .expect("write");

        let (config, source) = ValsuiteConfig::resolve(
            lookup(&[
                (CONFIG_PATH_ENV, json_path.to_str().expect("utf8")),
                (CONFIG_JSON_ENV, r#"{"database": "inline.db"}"#),
            ]),
            dir.path(),
        )
        .expect("load");
        assert_eq!(source, ConfigSource::EnvPath(json_path));
        assert_eq!(config.orchestrator.entity_parameter, "Region");
        assert_eq!(config.database, PathBuf::from("validation_results.db"));
    }

    #[test]
    fn invalid_layers_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");

        let err = ValsuiteConfig::resolve(lookup(&[(CONFIG_JSON_ENV, "{not json")]), dir.path())
            .expect_err("bad json");
        assert!(matches!(err, ConfigLoadError::Json { .. }));

        let err = ValsuiteConfig::resolve(
            lookup(&[(CONFIG_JSON_ENV, r#"{"orchestrator": {"max_concurrent_jobs": 0}}"#)]),
            dir.path(),
        )
        .expect_err("zero cap");
        assert!(matches!(err, ConfigLoadError::Invalid(_)));

        let missing = dir.path().join("absent.toml");
        let err = ValsuiteConfig::resolve(
            lookup(&[(CONFIG_PATH_ENV, missing.to_str().expect("utf8"))]),
            dir.path(),
        )
        .expect_err("missing file");
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }
}
