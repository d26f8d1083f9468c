//! Model catalogue and HuggingFace Hub downloads
//!
//! Knows the output dimension of the common sentence-transformer models and
//! fetches tokenizer files into a local cache directory.

use crate::error::{QaBotError, Result};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// Embedding models with a known output dimension
const KNOWN_EMBEDDING_MODELS: &[(&str, usize)] = &[
    ("sentence-transformers/all-MiniLM-L6-v2", 384),
    ("sentence-transformers/all-MiniLM-L12-v2", 384),
    ("sentence-transformers/all-mpnet-base-v2", 768),
    ("sentence-transformers/multi-qa-MiniLM-L6-cos-v1", 384),
    ("BAAI/bge-small-en-v1.5", 384),
    ("BAAI/bge-base-en-v1.5", 768),
];

/// Output dimension of a known embedding model.
///
/// Accepts both the full hub id and the bare model name.
pub fn known_dimension(model_name: &str) -> Option<usize> {
    KNOWN_EMBEDDING_MODELS
        .iter()
        .find(|(id, _)| *id == model_name || id.rsplit('/').next() == Some(model_name))
        .map(|(_, dim)| *dim)
}

/// Downloads and caches model files from the HuggingFace Hub
pub struct ModelManager {
    cache_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager, defaulting to `~/.cache/sds-qabot/models`
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".cache")
                .join("sds-qabot")
                .join("models")
        });
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local directory for a hub repository
    pub fn model_dir(&self, repo_id: &str) -> PathBuf {
        self.cache_dir.join(repo_id.replace('/', "--"))
    }

    /// Load a tokenizer, downloading `tokenizer.json` when it is not cached
    pub fn load_tokenizer(&self, repo_id: &str) -> Result<Tokenizer> {
        let path = self.fetch_file(repo_id, "tokenizer.json")?;
        Tokenizer::from_file(&path).map_err(|e| {
            QaBotError::Embedding(format!("Failed to load tokenizer from {:?}: {}", path, e))
        })
    }

    /// Fetch one file of a hub repository into the cache
    pub fn fetch_file(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        let target_dir = self.model_dir(repo_id);
        let target_path = target_dir.join(filename);
        if target_path.exists() && target_path.metadata()?.len() > 0 {
            log::debug!("Using cached {}/{}", repo_id, filename);
            return Ok(target_path);
        }

        std::fs::create_dir_all(&target_dir)?;
        log::info!("Downloading {}/{} from HuggingFace Hub", repo_id, filename);

        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| QaBotError::Embedding(format!("Failed to create HF API: {}", e)))?;
        let downloaded = api
            .model(repo_id.to_string())
            .get(filename)
            .map_err(|e| QaBotError::Embedding(format!("Failed to download {}: {}", filename, e)))?;

        std::fs::copy(&downloaded, &target_path)?;
        Ok(target_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_dimensions() {
        assert_eq!(known_dimension("sentence-transformers/all-MiniLM-L6-v2"), Some(384));
        assert_eq!(known_dimension("all-mpnet-base-v2"), Some(768));
        assert_eq!(known_dimension("some/unknown-model"), None);
    }

    #[test]
    fn test_model_dir_layout() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ModelManager::new(Some(temp_dir.path().to_path_buf())).unwrap();
        assert!(manager.cache_dir().exists());
        assert_eq!(
            manager.model_dir("sentence-transformers/all-MiniLM-L6-v2"),
            temp_dir.path().join("sentence-transformers--all-MiniLM-L6-v2")
        );
    }

    #[test]
    fn test_cached_file_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ModelManager::new(Some(temp_dir.path().to_path_buf())).unwrap();
        let dir = manager.model_dir("org/model");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tokenizer.json"), "{}").unwrap();

        let path = manager.fetch_file("org/model", "tokenizer.json").unwrap();
        assert_eq!(path, dir.join("tokenizer.json"));
    }
}
