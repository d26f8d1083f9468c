//! Text embedding
//!
//! Two embedders sit behind the [`Embedder`] trait:
//!
//! * [`LocalEmbedder`] hashes word and bigram features into a fixed-size
//!   vector. It runs offline and is fully deterministic, optionally using a
//!   HuggingFace tokenizer for the word segmentation.
//! * [`HubEmbedder`] calls the HuggingFace feature-extraction inference API
//!   for a sentence-transformer model.
//!
//! Whichever one builds the index must also embed the queries.

use crate::error::{QaBotError, Result};
use crate::ml::models::{ModelManager, known_dimension};
use async_trait::async_trait;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokenizers::Tokenizer;

/// Embedding vector type
pub type Embedding = Vec<f32>;

const HUB_INFERENCE_URL: &str = "https://api-inference.huggingface.co/pipeline/feature-extraction";

/// Embedding backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Local,
    Hub,
}

/// Configuration for the embedding model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model name or hub id
    pub model_name: String,
    /// Output dimension
    pub dimension: usize,
    /// Whether to normalize embeddings to unit length
    pub normalize: bool,
    /// Batch size for processing
    pub batch_size: usize,
    /// Hub id of a tokenizer used for word segmentation by the local backend
    pub tokenizer: Option<String>,
    /// Override for the inference endpoint URL
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            normalize: true,
            batch_size: 32,
            tokenizer: None,
            endpoint: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(QaBotError::Config("embedding.dimension must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(QaBotError::Config("embedding.batch_size must be > 0".to_string()));
        }
        if self.backend == EmbeddingBackend::Hub {
            if let Some(expected) = known_dimension(&self.model_name) {
                if expected != self.dimension {
                    return Err(QaBotError::Config(format!(
                        "{} produces {}-dimensional embeddings, configured {}",
                        self.model_name, expected, self.dimension
                    )));
                }
            }
        }
        Ok(())
    }

    /// Backend-qualified model identity recorded in the index manifest.
    ///
    /// Hashed features and hub embeddings share a dimension but not a
    /// vector space, so the backend is part of the identity.
    pub fn identity(&self) -> String {
        match (self.backend, &self.tokenizer) {
            (EmbeddingBackend::Local, None) => format!("local-hash:{}", self.model_name),
            (EmbeddingBackend::Local, Some(tokenizer)) => {
                format!("local-hash:{}+{}", self.model_name, tokenizer)
            }
            (EmbeddingBackend::Hub, _) => format!("hub:{}", self.model_name),
        }
    }
}

/// Maps text to fixed-size vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output dimension
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Identity that must match between the index and its queries
    fn identity(&self) -> String;

    /// Embed a batch of document chunks, preserving order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single query
    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_documents(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| QaBotError::Embedding("Embedder returned no vector".to_string()))
    }
}

/// Build the embedder described by `config`
pub fn build_embedder(config: &EmbeddingConfig, credential: Option<String>) -> Result<Arc<dyn Embedder>> {
    config.validate()?;
    match config.backend {
        EmbeddingBackend::Local => Ok(Arc::new(LocalEmbedder::new(config.clone())?)),
        EmbeddingBackend::Hub => Ok(Arc::new(HubEmbedder::new(config.clone(), credential)?)),
    }
}

/// Offline feature-hashing embedder
pub struct LocalEmbedder {
    config: EmbeddingConfig,
    tokenizer: Option<Tokenizer>,
}

impl LocalEmbedder {
    /// Create the embedder, downloading the configured tokenizer if any
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        match &config.tokenizer {
            Some(repo_id) => {
                let tokenizer = ModelManager::new(None)?.load_tokenizer(repo_id)?;
                Ok(Self::with_tokenizer(config, tokenizer))
            }
            None => Ok(Self {
                config,
                tokenizer: None,
            }),
        }
    }

    /// Create the embedder with an already loaded tokenizer
    pub fn with_tokenizer(config: EmbeddingConfig, tokenizer: Tokenizer) -> Self {
        Self {
            config,
            tokenizer: Some(tokenizer),
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Embed one text synchronously
    pub fn encode(&self, text: &str) -> Result<Embedding> {
        let tokens = self.tokenize(text)?;
        let dim = self.config.dimension;
        let mut embedding = vec![0.0f32; dim];

        for token in &tokens {
            add_feature(&mut embedding, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            add_feature(&mut embedding, bigram.as_bytes(), 0.5);
        }

        if self.config.normalize {
            normalize(&mut embedding);
        }
        Ok(embedding)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        match &self.tokenizer {
            Some(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, false)
                    .map_err(|e| QaBotError::Embedding(format!("Tokenization failed: {}", e)))?;
                Ok(encoding
                    .get_tokens()
                    .iter()
                    .map(|t| t.to_lowercase())
                    .filter(|t| t.chars().any(char::is_alphanumeric))
                    .collect())
            }
            None => Ok(text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect()),
        }
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn identity(&self) -> String {
        self.config.identity()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let encoded: Vec<Embedding> = batch
                .par_iter()
                .map(|text| self.encode(text))
                .collect::<Result<_>>()?;
            embeddings.extend(encoded);
        }
        Ok(embeddings)
    }
}

/// 64-bit FNV-1a; stable across platforms and releases
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn add_feature(embedding: &mut [f32], feature: &[u8], weight: f32) {
    let hash = fnv1a(feature);
    let index = (hash % embedding.len() as u64) as usize;
    let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
    embedding[index] += sign * weight;
}

/// Scale to unit length; zero vectors are left untouched
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    }
}

/// Sentence-transformer embeddings from the HuggingFace inference API
pub struct HubEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HubEmbedder {
    pub fn new(config: EmbeddingConfig, token: Option<String>) -> Result<Self> {
        let url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/{}", HUB_INFERENCE_URL, config.model_name));
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            url,
            token,
        })
    }

    async fn request(&self, batch: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "inputs": batch,
            "options": { "wait_for_model": true },
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QaBotError::Embedding(format!(
                "Inference API returned {}: {}",
                status, text
            )));
        }

        let value: Value = response.json().await?;
        let mut embeddings = parse_feature_response(&value)?;
        for embedding in &mut embeddings {
            if embedding.len() != self.config.dimension {
                return Err(QaBotError::Embedding(format!(
                    "Expected {}-dimensional embeddings, got {}",
                    self.config.dimension,
                    embedding.len()
                )));
            }
            if self.config.normalize {
                normalize(embedding);
            }
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for HubEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn identity(&self) -> String {
        self.config.identity()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let encoded = self.request(batch).await?;
            if encoded.len() != batch.len() {
                return Err(QaBotError::Embedding(format!(
                    "Requested {} embeddings, received {}",
                    batch.len(),
                    encoded.len()
                )));
            }
            embeddings.extend(encoded);
        }
        log::debug!("Embedded {} texts via {}", texts.len(), self.url);
        Ok(embeddings)
    }
}

/// Decode a feature-extraction response.
///
/// Sentence-level models return one vector per input; token-level models
/// return a matrix per input, which is mean-pooled.
pub fn parse_feature_response(value: &Value) -> Result<Vec<Embedding>> {
    let inputs = value
        .as_array()
        .ok_or_else(|| QaBotError::Embedding(format!("Unexpected response: {}", value)))?;

    inputs
        .iter()
        .map(|item| match item.as_array().and_then(|row| row.first()) {
            Some(Value::Array(_)) => {
                let rows = item
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(to_vector)
                    .collect::<Result<Vec<_>>>()?;
                mean_pool(&rows)
            }
            _ => to_vector(item),
        })
        .collect()
}

fn to_vector(value: &Value) -> Result<Embedding> {
    value
        .as_array()
        .ok_or_else(|| QaBotError::Embedding("Expected an array of numbers".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| QaBotError::Embedding(format!("Not a number: {}", v)))
        })
        .collect()
}

fn mean_pool(rows: &[Embedding]) -> Result<Embedding> {
    let first = rows
        .first()
        .ok_or_else(|| QaBotError::Embedding("Empty token matrix".to_string()))?;
    let mut pooled = vec![0.0f32; first.len()];
    for row in rows {
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let count = rows.len() as f32;
    pooled.iter_mut().for_each(|x| *x /= count);
    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    const WORD_LEVEL_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "acetone": 1, "flammable": 2},
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_tokenizer_drives_features() {
        let tokenizer: Tokenizer = WORD_LEVEL_TOKENIZER.parse().unwrap();
        let tokenized = LocalEmbedder::with_tokenizer(EmbeddingConfig::default(), tokenizer);
        let plain = LocalEmbedder::new(EmbeddingConfig::default()).unwrap();

        let known = "acetone flammable";
        assert_eq!(tokenized.encode(known).unwrap(), plain.encode(known).unwrap());

        // Out-of-vocabulary words all map to the unknown token
        assert_eq!(
            tokenized.encode("benzene").unwrap(),
            tokenized.encode("toluene").unwrap()
        );
        assert_ne!(plain.encode("benzene").unwrap(), plain.encode("toluene").unwrap());
    }

    #[tokio::test]
    async fn test_local_embedding_shape_and_norm() {
        let embedder = LocalEmbedder::new(EmbeddingConfig::default()).unwrap();
        let embedding = embedder.embed_query("Acetone is a flammable liquid").await.unwrap();

        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedding_deterministic() {
        let embedder = LocalEmbedder::new(EmbeddingConfig::default()).unwrap();
        let texts = vec!["acetone".to_string(), "benzene".to_string()];
        let first = embedder.embed_documents(&texts).await.unwrap();
        let second = embedder.embed_documents(&texts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_related_texts_are_closer() {
        let embedder = LocalEmbedder::new(EmbeddingConfig::default()).unwrap();
        let query = embedder.embed_query("acetone flash point").await.unwrap();
        let related = embedder
            .embed_query("The flash point of acetone is -20 C")
            .await
            .unwrap();
        let unrelated = embedder
            .embed_query("Benzene causes leukemia with chronic exposure")
            .await
            .unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let config = EmbeddingConfig {
            batch_size: 2,
            ..Default::default()
        };
        let embedder = LocalEmbedder::new(config).unwrap();
        let texts: Vec<String> = (0..5).map(|i| format!("chemical number {}", i)).collect();
        let batch = embedder.embed_documents(&texts).await.unwrap();
        assert_eq!(batch.len(), 5);
        for (text, embedding) in texts.iter().zip(&batch) {
            assert_eq!(&embedder.encode(text).unwrap(), embedding);
        }
    }

    #[test]
    fn test_identity_includes_backend() {
        let local = EmbeddingConfig::default();
        let hub = EmbeddingConfig {
            backend: EmbeddingBackend::Hub,
            ..Default::default()
        };
        assert_eq!(local.identity(), "local-hash:sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(hub.identity(), "hub:sentence-transformers/all-MiniLM-L6-v2");

        let tokenized = EmbeddingConfig {
            tokenizer: Some("bert-base-uncased".to_string()),
            ..Default::default()
        };
        assert_ne!(tokenized.identity(), local.identity());
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = LocalEmbedder::new(EmbeddingConfig::default()).unwrap();
        let embedding = embedder.encode("   ").unwrap();
        assert!(embedding.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_config_validation() {
        assert!(EmbeddingConfig::default().validate().is_ok());
        let bad = EmbeddingConfig {
            backend: EmbeddingBackend::Hub,
            dimension: 768,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_parse_sentence_level_response() {
        let value = serde_json::json!([[0.1, 0.2], [0.3, 0.4]]);
        let parsed = parse_feature_response(&value).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_relative_eq!(parsed[1][0], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_parse_token_level_response_is_pooled() {
        let value = serde_json::json!([[[1.0, 2.0], [3.0, 4.0]]]);
        let parsed = parse_feature_response(&value).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_relative_eq!(parsed[0][0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(parsed[0][1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_parse_rejects_error_payload() {
        let value = serde_json::json!({"error": "Model is loading"});
        assert!(parse_feature_response(&value).is_err());
    }
}
