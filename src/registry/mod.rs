//! Model packaging and registry
//!
//! A packaged bot ([`artifact::ModelArtifact`]) is registered under a model
//! name, which assigns it the next version number in stage `None`. Promotion
//! moves the newest unstaged version to `Production` and archives whatever
//! was in production before.

pub mod artifact;
pub mod local;
pub mod mlflow;

pub use artifact::ModelArtifact;
pub use local::LocalRegistry;
pub use mlflow::MlflowRegistry;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::error::{QaBotError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle stage of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::None, Stage::Staging, Stage::Production, Stage::Archived];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = QaBotError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QaBotError::Registry(format!("Unknown stage '{}'", s)))
    }
}

/// One registered version of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub stage: Stage,
    /// Where the version's artifact lives
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Which version a `models:/` URI points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelReference {
    Stage(Stage),
    Version(u32),
}

/// Parse `models:/<name>/<stage|version>`
pub fn parse_model_uri(uri: &str) -> Result<(String, ModelReference)> {
    let rest = uri
        .strip_prefix("models:/")
        .ok_or_else(|| QaBotError::Registry(format!("Not a models:/ URI: {}", uri)))?;
    let (name, reference) = rest
        .trim_matches('/')
        .rsplit_once('/')
        .ok_or_else(|| QaBotError::Registry(format!("Expected models:/<name>/<stage|version>, got {}", uri)))?;
    if name.is_empty() {
        return Err(QaBotError::Registry(format!("Missing model name in {}", uri)));
    }

    let reference = match reference.parse::<u32>() {
        Ok(version) => ModelReference::Version(version),
        Err(_) => ModelReference::Stage(reference.parse()?),
    };
    Ok((name.to_string(), reference))
}

/// Versioned model catalogue
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register `source` as the next version of `name`, creating the model if needed
    async fn register(&self, name: &str, source: &str) -> Result<ModelVersion>;

    /// Newest version in each of `stages` (every stage when empty)
    async fn latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>>;

    /// Move a version to `stage`; with `archive_existing`, versions already in
    /// that stage are archived
    async fn transition_stage(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion>;

    async fn get_version(&self, name: &str, version: u32) -> Result<ModelVersion>;
}

/// Move the newest unstaged version of `name` to production
pub async fn promote_latest(registry: &dyn ModelRegistry, name: &str) -> Result<ModelVersion> {
    let latest = registry
        .latest_versions(name, &[Stage::None])
        .await?
        .into_iter()
        .max_by_key(|v| v.version)
        .ok_or_else(|| QaBotError::Registry(format!("{} has no version in stage None", name)))?;

    log::info!("Promoting {} version {} to Production", name, latest.version);
    registry
        .transition_stage(name, latest.version, Stage::Production, true)
        .await
}

/// Version a `models:/<name>/<stage|version>` URI points at
pub async fn resolve_model_uri(registry: &dyn ModelRegistry, uri: &str) -> Result<ModelVersion> {
    let (name, reference) = parse_model_uri(uri)?;
    match reference {
        ModelReference::Version(version) => registry.get_version(&name, version).await,
        ModelReference::Stage(stage) => registry
            .latest_versions(&name, &[stage])
            .await?
            .into_iter()
            .max_by_key(|v| v.version)
            .ok_or_else(|| QaBotError::Registry(format!("{} has no version in stage {}", name, stage))),
    }
}

/// Local artifact directory behind a `models:/` URI
pub async fn resolve_artifact_dir(registry: &dyn ModelRegistry, uri: &str) -> Result<PathBuf> {
    let version = resolve_model_uri(registry, uri).await?;
    let dir = PathBuf::from(version.source.strip_prefix("file://").unwrap_or(&version.source));
    if !dir.is_dir() {
        return Err(QaBotError::Registry(format!(
            "{} version {} is stored at {}, which is not a local directory",
            version.name, version.version, version.source
        )));
    }
    log::info!("{} resolved to {}", uri, dir.display());
    Ok(dir)
}

/// Build the registry client described by `config`
pub fn build_registry(config: &RegistryConfig, token: Option<String>) -> Result<Box<dyn ModelRegistry>> {
    match config.backend {
        RegistryBackend::Local => Ok(Box::new(LocalRegistry::open(&config.root)?)),
        RegistryBackend::Mlflow => {
            let uri = config.tracking_uri.as_deref().ok_or_else(|| {
                QaBotError::Config("registry.tracking_uri is required for the mlflow backend".to_string())
            })?;
            Ok(Box::new(MlflowRegistry::new(uri, token)))
        }
    }
}
