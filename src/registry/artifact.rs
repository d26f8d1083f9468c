//! Packaged bot artifacts
//!
//! An artifact directory holds everything needed to serve the bot without
//! the original data directory:
//!
//! ```text
//! <dest>/artifact.json         manifest and configuration snapshot
//! <dest>/prompt_template.txt
//! <dest>/index/                copy of the persisted vector index
//! ```

use crate::config::Config;
use crate::error::{QaBotError, Result};
use crate::storage::StoreManifest;
use crate::utils::{copy_dir_recursive, format_file_size, paths_overlap, reset_directory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ARTIFACT_FILE: &str = "artifact.json";
pub const PROMPT_FILE: &str = "prompt_template.txt";
pub const INDEX_DIR: &str = "index";

/// Descriptive part of `artifact.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactManifest {
    pub name: String,
    pub crate_version: String,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    pub generation_model: String,
    pub documents_indexed: usize,
    /// Runtime requirements of the packaged bot
    pub dependencies: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ArtifactFile {
    #[serde(flatten)]
    manifest: ArtifactManifest,
    config: Config,
}

/// A packaged bot on disk
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub dir: PathBuf,
    pub manifest: ArtifactManifest,
    pub config: Config,
    pub prompt_template: String,
}

impl ModelArtifact {
    /// Package the index built from `config` into `dest`, replacing its contents
    pub fn package(config: &Config, dest: &Path) -> Result<Self> {
        config.validate()?;

        let index_src = &config.paths.vector_persist_dir;
        let store = StoreManifest::load(index_src).map_err(|e| {
            QaBotError::Registry(format!(
                "No index to package at {}: {}",
                index_src.display(),
                e
            ))
        })?;

        if paths_overlap(dest, index_src)? {
            return Err(QaBotError::Registry(format!(
                "Artifact directory {} overlaps the index at {}",
                dest.display(),
                index_src.display()
            )));
        }

        reset_directory(dest)?;
        let bytes = copy_dir_recursive(index_src, &dest.join(INDEX_DIR))?;
        fs::write(dest.join(PROMPT_FILE), &config.prompt_template)?;

        let manifest = ArtifactManifest {
            name: config.registry.model_name.clone(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            embedding_model: config.embedding.identity(),
            generation_model: config.generation.model_name.clone(),
            documents_indexed: store.count,
            dependencies: runtime_dependencies(config),
        };
        let file = ArtifactFile {
            manifest: manifest.clone(),
            config: config.clone(),
        };
        fs::write(dest.join(ARTIFACT_FILE), serde_json::to_string_pretty(&file)?)?;

        log::info!(
            "Packaged {} ({} entries, {} of index data) into {}",
            manifest.name,
            store.count,
            format_file_size(bytes),
            dest.display()
        );

        Ok(Self {
            dir: dest.to_path_buf(),
            manifest,
            config: config.clone(),
            prompt_template: config.prompt_template.clone(),
        })
    }

    /// Read a packaged bot back from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ARTIFACT_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            QaBotError::Registry(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let file: ArtifactFile = serde_json::from_str(&content)?;
        let prompt_template = fs::read_to_string(dir.join(PROMPT_FILE))?;

        let index_dir = dir.join(INDEX_DIR);
        if !index_dir.is_dir() {
            return Err(QaBotError::Registry(format!(
                "Artifact at {} has no index directory",
                dir.display()
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest: file.manifest,
            config: file.config,
            prompt_template,
        })
    }

    pub fn index_dir(&self) -> PathBuf {
        self.dir.join(INDEX_DIR)
    }
}

/// Crate and model requirements recorded with the artifact
pub fn runtime_dependencies(config: &Config) -> Vec<String> {
    let mut deps = vec![
        format!("{}=={}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        format!("embedding-model=={}", config.embedding.identity()),
        format!("generation-model=={}", config.generation.model_name),
    ];
    for extra in &config.packaging.extra_dependencies {
        if !deps.contains(extra) {
            deps.push(extra.clone());
        }
    }
    deps
}
