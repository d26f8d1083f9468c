//! Configuration for sds-qabot
//!
//! One [`Config`] value is read at startup (from a JSON file or the defaults)
//! and handed to every component constructor. Nothing reads configuration
//! from global state.

use crate::error::{QaBotError, Result};
use crate::ml::embedding::EmbeddingConfig;
use crate::ml::generation::GenerationParams;
use crate::storage::DistanceMetric;
use crate::utils::is_within;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prompt used when none is configured. `{context}` and `{question}` are
/// substituted at query time.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Use the following pieces of information to answer the user's question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}
Question: {question}

Only return the helpful answer below and nothing else.
Helpful answer:
";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub prompt_template: String,
    pub credentials: CredentialsConfig,
    pub registry: RegistryConfig,
    pub packaging: PackagingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            credentials: CredentialsConfig::default(),
            registry: RegistryConfig::default(),
            packaging: PackagingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QaBotError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            QaBotError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.embedding.dimension == 0 {
            return Err(QaBotError::Config(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.k == 0 {
            return Err(QaBotError::Config("retrieval.k must be greater than zero".to_string()));
        }
        if self.retrieval.fetch_k < self.retrieval.k {
            return Err(QaBotError::Config(format!(
                "retrieval.fetch_k ({}) must be at least retrieval.k ({})",
                self.retrieval.fetch_k, self.retrieval.k
            )));
        }
        for placeholder in ["{context}", "{question}"] {
            if !self.prompt_template.contains(placeholder) {
                return Err(QaBotError::Config(format!(
                    "prompt_template is missing the {} placeholder",
                    placeholder
                )));
            }
        }
        if is_within(&self.paths.data_dir, &self.paths.vector_persist_dir)? {
            return Err(QaBotError::Config(format!(
                "paths.data_dir ({}) must not lie inside paths.vector_persist_dir ({}), which is cleared on ingestion",
                self.paths.data_dir.display(),
                self.paths.vector_persist_dir.display()
            )));
        }
        if self.registry.model_name.trim().is_empty() {
            return Err(QaBotError::Config("registry.model_name is required".to_string()));
        }
        Ok(())
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the source PDF files
    pub data_dir: PathBuf,
    /// Directory the vector index is written to; cleared on every ingestion run
    pub vector_persist_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sds_pdf"),
            vector_persist_dir: PathBuf::from("index/sds"),
        }
    }
}

/// Text splitting parameters, both in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 20,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QaBotError::Config("chunking.chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaBotError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Vector store backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Exact search over an in-process index persisted as flat files
    Flat,
    /// Same files as `Flat`, searched through an HNSW graph
    Hnsw,
    /// Embedded SQLite collection
    Sqlite,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub metric: DistanceMetric,
    /// HNSW construction beam width
    pub ef_construction: usize,
    /// HNSW query beam width; also the largest pool the graph can return
    pub ef_search: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Flat,
            metric: DistanceMetric::Cosine,
            ef_construction: 200,
            ef_search: 128,
        }
    }
}

/// How a metadata filter interacts with the nearest-neighbour pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    /// Fetch `fetch_k` nearest entries, then drop non-matching ones.
    /// Highly selective filters may return fewer than `k` entries.
    PostFilter,
    /// Rank only the entries that match the filter
    PreFilter,
}

/// Retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of documents handed to the prompt
    pub k: usize,
    /// Pool size searched before filtering
    pub fetch_k: usize,
    pub strategy: FilterStrategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 10,
            fetch_k: 100,
            strategy: FilterStrategy::PostFilter,
        }
    }
}

/// Text generation backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorBackend {
    /// Hugging Face text-generation inference API
    Hub,
    /// OpenAI-compatible chat completions endpoint
    #[serde(rename = "openai")]
    OpenAi,
    /// No language model: answers with the retrieved context
    ContextOnly,
}

/// Generation model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: GeneratorBackend,
    pub model_name: String,
    /// Base URL of the inference service; backend default when `None`
    pub endpoint: Option<String>,
    /// Sampling parameters; derived from `model_name` when `None`
    pub params: Option<GenerationParams>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Hub,
            model_name: "meta-llama/Llama-2-7b-chat-hf".to_string(),
            endpoint: None,
            params: None,
        }
    }
}

impl GenerationConfig {
    /// Configured parameters, or the preset for the model family
    pub fn effective_params(&self) -> GenerationParams {
        self.params
            .clone()
            .unwrap_or_else(|| GenerationParams::for_model(&self.model_name))
    }
}

/// Where the model-hosting access token comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable checked first
    pub token_env: String,
    /// Root of the secrets directory (`<secrets_dir>/<scope>/<key>`)
    pub secrets_dir: Option<PathBuf>,
    pub secret_scope: String,
    pub secret_key: String,
    /// Environment variable holding the registry (tracking server) token
    pub registry_token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_env: "HUGGINGFACEHUB_API_TOKEN".to_string(),
            secrets_dir: None,
            secret_scope: "solution-accelerator-cicd".to_string(),
            secret_key: "huggingface".to_string(),
            registry_token_env: "DATABRICKS_TOKEN".to_string(),
        }
    }
}

/// Model registry backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// SQLite catalogue plus artifact copies under `registry.root`
    Local,
    /// MLflow tracking server REST API at `registry.tracking_uri`
    Mlflow,
}

/// Model registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub root: PathBuf,
    pub tracking_uri: Option<String>,
    pub model_name: String,
    pub serving_endpoint_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Local,
            root: PathBuf::from(".qabot/registry"),
            tracking_uri: None,
            model_name: "mfg-llm-qabot".to_string(),
            serving_endpoint_name: "mfg-llm-qabot-serving-endpoint".to_string(),
        }
    }
}

/// Packaging options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackagingConfig {
    /// Extra runtime requirements recorded in the artifact manifest
    pub extra_dependencies: Vec<String>,
}
