//! Vector storage for sds-qabot
//!
//! An index is a directory holding a manifest (`index.json`) plus the
//! backend's own files. Two backends implement [`VectorStore`]:
//!
//! * [`FlatStore`]: vectors in `vectors.bin`, texts and metadata in
//!   `docstore.json`. Searched exactly, or through an HNSW graph when the
//!   store kind is `hnsw`.
//! * [`SqliteStore`]: one embedded SQLite database, `collection.db`.

pub mod flat;
pub mod schema;
pub mod sqlite;

pub use flat::FlatStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreConfig, StoreKind};
use crate::error::{QaBotError, Result};
use crate::ml::embedding::Embedding;
use crate::text::document::{Chunk, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest file name shared by every backend
pub const MANIFEST_FILE: &str = "index.json";

/// Distance metrics supported
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine distance (good for normalized embeddings)
    #[default]
    Cosine,
    /// Euclidean distance (L2)
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two vectors; smaller is closer
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0 // Maximum distance for zero vectors
                } else {
                    1.0 - (dot / (norm_a * norm_b))
                }
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

/// One chunk as stored in an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Embedding,
}

impl IndexEntry {
    pub fn from_chunk(chunk: Chunk, embedding: Embedding) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            metadata: chunk.metadata,
            embedding,
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl ScoredEntry {
    /// The `Name` attribute, `""` when absent
    pub fn name(&self) -> &str {
        self.metadata
            .get(crate::text::document::NAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Exact-match conditions on metadata attributes; empty matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on a single attribute
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut filter = Self::new();
        filter.insert(key, value);
        filter
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// True when every condition equals the entry's attribute
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for MetadataFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Self::new();
        for (key, value) in iter {
            filter.insert(key, value);
        }
        filter
    }
}

/// Description of a persisted index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub kind: StoreKind,
    pub metric: DistanceMetric,
    pub dimension: usize,
    pub count: usize,
    /// Embedding model the vectors were produced with
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoreManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(QaBotError::Store(format!(
                "No index found at {} (missing {})",
                dir.display(),
                MANIFEST_FILE
            )));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Nearest-neighbour index over chunk embeddings
pub trait VectorStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append entries; ids must be unique across the whole index
    fn add_entries(&mut self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Up to `limit` entries in ascending distance order.
    ///
    /// With a filter only matching entries are ranked. Ties keep insertion
    /// order.
    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>>;

    /// All ids in insertion order
    fn ids(&self) -> Result<Vec<String>>;

    /// Record the embedding model in the manifest
    fn set_embedding_model(&mut self, model_name: &str);

    /// Flush everything to the index directory
    fn persist(&mut self) -> Result<()>;
}

/// Create an empty index in `dir`
pub fn create_store(config: &StoreConfig, dir: &Path, dimension: usize) -> Result<Box<dyn VectorStore>> {
    if dimension == 0 {
        return Err(QaBotError::Store("Index dimension must be > 0".to_string()));
    }
    std::fs::create_dir_all(dir)?;
    log::info!("Creating {:?} index at {}", config.kind, dir.display());
    match config.kind {
        StoreKind::Flat | StoreKind::Hnsw => Ok(Box::new(FlatStore::create(config, dir, dimension))),
        StoreKind::Sqlite => Ok(Box::new(SqliteStore::create(config, dir, dimension)?)),
    }
}

/// Open the index persisted in `dir`; the backend comes from its manifest
pub fn open_store(config: &StoreConfig, dir: &Path) -> Result<Box<dyn VectorStore>> {
    let manifest = StoreManifest::load(dir)?;
    if manifest.kind != config.kind {
        log::warn!(
            "Index at {} was built as {:?}; configured {:?} is ignored",
            dir.display(),
            manifest.kind,
            config.kind
        );
    }
    match manifest.kind {
        StoreKind::Flat | StoreKind::Hnsw => Ok(Box::new(FlatStore::open(config, dir, manifest)?)),
        StoreKind::Sqlite => Ok(Box::new(SqliteStore::open(dir, manifest)?)),
    }
}

/// Reject a query or entry of the wrong dimension
pub(crate) fn check_dimension(expected: usize, actual: usize, what: &str) -> Result<()> {
    if expected != actual {
        return Err(QaBotError::Store(format!(
            "{} dimension {} doesn't match index dimension {}",
            what, actual, expected
        )));
    }
    Ok(())
}
