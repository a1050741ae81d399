//! Providers of the revision marker that decides staleness.
//!
//! The store only ever compares fingerprints for equality, so any source
//! that yields a stable opaque string will do.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use valsuite_model::Fingerprint;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("git rev-parse failed in {repo_dir}: {message}")]
    Git { repo_dir: PathBuf, message: String },

    #[error("failed to spawn git: {0}")]
    Spawn(#[from] io::Error),
}

#[async_trait]
pub trait FingerprintSource: Send + Sync {
    async fn current(&self) -> Result<Fingerprint, FingerprintError>;
}

/// The `HEAD` commit of a git working tree.
#[derive(Debug, Clone)]
pub struct GitRevision {
    repo_dir: PathBuf,
}

impl GitRevision {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl FingerprintSource for GitRevision {
    async fn current(&self) -> Result<Fingerprint, FingerprintError> {
        let output = Command::new("git")
            .arg("rev-parse")
            .arg("HEAD")
            .current_dir(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(FingerprintError::Git {
                repo_dir: self.repo_dir.clone(),
                message: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
            });
        }

        let revision = String::from_utf8_lossy(&output.stdout);
        let fingerprint =
            Fingerprint::new(revision.trim()).map_err(|e| FingerprintError::Git {
                repo_dir: self.repo_dir.clone(),
                message: e.to_string(),
            })?;
        debug!(fingerprint = fingerprint.short(), "resolved git revision");
        Ok(fingerprint)
    }
}

/// A fixed fingerprint, for tests and explicit overrides.
#[derive(Debug, Clone)]
pub struct StaticFingerprint(Fingerprint);

impl StaticFingerprint {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self(fingerprint)
    }
}

#[async_trait]
impl FingerprintSource for StaticFingerprint {
    async fn current(&self) -> Result<Fingerprint, FingerprintError> {
        Ok(self.0.clone())
    }
}
