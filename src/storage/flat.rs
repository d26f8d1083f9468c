//! In-process vector index persisted as flat files
//!
//! Exact search ranks every (matching) entry. In HNSW mode an
//! `instant-distance` graph is built lazily on the first unfiltered search
//! and discarded whenever entries are added.

use crate::config::{StoreConfig, StoreKind};
use crate::error::{QaBotError, Result};
use crate::ml::embedding::Embedding;
use crate::storage::{
    DistanceMetric, IndexEntry, MetadataFilter, ScoredEntry, StoreManifest, VectorStore,
    check_dimension,
};
use crate::text::document::Metadata;
use chrono::Utc;
use instant_distance::{Builder, HnswMap, Point, Search};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const DOCSTORE_FILE: &str = "docstore.json";

/// Seed for graph construction so that searches are reproducible
const HNSW_SEED: u64 = 0x5d5_9ab0;

/// Point implementation for instant-distance HNSW
#[derive(Clone, Debug)]
pub struct VectorPoint {
    pub data: Vec<f32>,
    pub metric: DistanceMetric,
}

impl Point for VectorPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.metric.distance(&self.data, &other.data)
    }
}

/// Text and metadata of one entry, as written to `docstore.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    text: String,
    metadata: Metadata,
}

/// Exact or HNSW search over vectors held in memory
pub struct FlatStore {
    dir: PathBuf,
    kind: StoreKind,
    metric: DistanceMetric,
    dimension: usize,
    ef_construction: usize,
    ef_search: usize,
    documents: Vec<StoredDocument>,
    vectors: Vec<Embedding>,
    ids: HashSet<String>,
    embedding_model: Option<String>,
    graph: OnceLock<HnswMap<VectorPoint, usize>>,
}

impl FlatStore {
    /// Create an empty store that persists into `dir`
    pub fn create(config: &StoreConfig, dir: &Path, dimension: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            kind: match config.kind {
                StoreKind::Hnsw => StoreKind::Hnsw,
                _ => StoreKind::Flat,
            },
            metric: config.metric,
            dimension,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            documents: Vec::new(),
            vectors: Vec::new(),
            ids: HashSet::new(),
            embedding_model: None,
            graph: OnceLock::new(),
        }
    }

    /// Load a persisted store
    pub fn open(config: &StoreConfig, dir: &Path, manifest: StoreManifest) -> Result<Self> {
        let vectors: Vec<Embedding> = bincode::deserialize(&std::fs::read(dir.join(VECTORS_FILE))?)?;
        let documents: Vec<StoredDocument> =
            serde_json::from_str(&std::fs::read_to_string(dir.join(DOCSTORE_FILE))?)?;

        if vectors.len() != documents.len() {
            return Err(QaBotError::Store(format!(
                "Index at {} is inconsistent: {} vectors, {} documents",
                dir.display(),
                vectors.len(),
                documents.len()
            )));
        }
        for vector in &vectors {
            check_dimension(manifest.dimension, vector.len(), "Stored vector")?;
        }

        let ids = documents.iter().map(|d| d.id.clone()).collect();
        log::info!(
            "Loaded {:?} index from {} with {} vectors",
            manifest.kind,
            dir.display(),
            vectors.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            kind: manifest.kind,
            metric: manifest.metric,
            dimension: manifest.dimension,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            documents,
            vectors,
            ids,
            embedding_model: manifest.embedding_model,
            graph: OnceLock::new(),
        })
    }

    fn scored(&self, index: usize, distance: f32) -> ScoredEntry {
        let doc = &self.documents[index];
        ScoredEntry {
            id: doc.id.clone(),
            text: doc.text.clone(),
            metadata: doc.metadata.clone(),
            distance,
        }
    }

    fn search_exact(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredEntry> {
        let mut distances: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(i, _)| filter.is_none_or(|f| f.matches(&self.documents[*i].metadata)))
            .map(|(i, vector)| (i, self.metric.distance(query, vector)))
            .collect();

        // Stable sort keeps insertion order among equal distances
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(limit);

        distances
            .into_iter()
            .map(|(i, distance)| self.scored(i, distance))
            .collect()
    }

    fn search_graph(&self, query: &[f32], limit: usize) -> Vec<ScoredEntry> {
        let graph = self.graph.get_or_init(|| {
            log::info!(
                "Building HNSW index with {} vectors, dimension {}",
                self.vectors.len(),
                self.dimension
            );
            let points = self
                .vectors
                .iter()
                .map(|v| VectorPoint {
                    data: v.clone(),
                    metric: self.metric,
                })
                .collect();
            Builder::default()
                .ef_construction(self.ef_construction)
                .ef_search(self.ef_search)
                .seed(HNSW_SEED)
                .build(points, (0..self.vectors.len()).collect())
        });

        let query = VectorPoint {
            data: query.to_vec(),
            metric: self.metric,
        };
        let mut search = Search::default();
        let mut hits: Vec<(usize, f32)> = graph
            .search(&query, &mut search)
            .take(limit)
            .map(|item| (*item.value, item.distance))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        hits.into_iter()
            .map(|(i, distance)| self.scored(i, distance))
            .collect()
    }
}

impl VectorStore for FlatStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn add_entries(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            check_dimension(self.dimension, entry.embedding.len(), "Vector")?;
        }
        let mut batch_ids = HashSet::new();
        for entry in &entries {
            if self.ids.contains(&entry.id) || !batch_ids.insert(entry.id.as_str()) {
                return Err(QaBotError::Store(format!("Duplicate id {}", entry.id)));
            }
        }

        let added = entries.len();
        for entry in entries {
            self.ids.insert(entry.id.clone());
            self.vectors.push(entry.embedding);
            self.documents.push(StoredDocument {
                id: entry.id,
                text: entry.text,
                metadata: entry.metadata,
            });
        }

        self.graph = OnceLock::new();
        log::debug!("Added {} entries, index now holds {}", added, self.vectors.len());
        Ok(())
    }

    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        check_dimension(self.dimension, query.len(), "Query")?;
        if limit == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let filter = filter.filter(|f| !f.is_empty());
        // The graph cannot return more than ef_search hits, nor restrict to a filter
        if self.kind == StoreKind::Hnsw && filter.is_none() && limit <= self.ef_search {
            Ok(self.search_graph(query, limit))
        } else {
            Ok(self.search_exact(query, limit, filter))
        }
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.documents.iter().map(|d| d.id.clone()).collect())
    }

    fn set_embedding_model(&mut self, model_name: &str) {
        self.embedding_model = Some(model_name.to_string());
    }

    fn persist(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(VECTORS_FILE), bincode::serialize(&self.vectors)?)?;
        std::fs::write(
            self.dir.join(DOCSTORE_FILE),
            serde_json::to_string(&self.documents)?,
        )?;
        StoreManifest {
            kind: self.kind,
            metric: self.metric,
            dimension: self.dimension,
            count: self.vectors.len(),
            embedding_model: self.embedding_model.clone(),
            updated_at: Utc::now(),
        }
        .save(&self.dir)?;

        log::info!("Saved {} vectors to {}", self.vectors.len(), self.dir.display());
        Ok(())
    }
}
