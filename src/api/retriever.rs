//! Similarity retrieval with metadata filtering
//!
//! A [`Retriever`] embeds the question, asks the vector store for neighbours
//! and applies the optional metadata filter according to the configured
//! [`FilterStrategy`].

use crate::config::{Config, FilterStrategy, RetrievalConfig};
use crate::error::{QaBotError, Result};
use crate::ml::embedding::Embedder;
use crate::storage::{MetadataFilter, ScoredEntry, StoreManifest, VectorStore, open_store};
use std::sync::Arc;

/// Separator placed between retrieved chunks in the prompt context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Documents retrieved for one question
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Hits in ascending distance order
    pub documents: Vec<ScoredEntry>,
    /// The `k` that was asked for
    pub requested: usize,
    /// How many fewer than `requested` came back
    pub shortfall: usize,
    /// Whether a non-empty filter was applied
    pub filtered: bool,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn texts(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.text.clone()).collect()
    }

    /// Chunk texts joined into a single prompt context
    pub fn context(&self) -> String {
        self.documents
            .iter()
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

/// Question-to-chunks retrieval over a vector store
pub struct Retriever {
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Box<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        if store.dimension() != embedder.dimension() {
            return Err(QaBotError::Retrieval(format!(
                "Embedder produces {}-dimensional vectors but the index holds {}",
                embedder.dimension(),
                store.dimension()
            )));
        }
        if config.k == 0 || config.fetch_k < config.k {
            return Err(QaBotError::Config(format!(
                "Invalid retrieval parameters k={} fetch_k={}",
                config.k, config.fetch_k
            )));
        }
        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    /// Open the persisted index named by `config.paths.vector_persist_dir`
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dir = &config.paths.vector_persist_dir;
        let store = open_store(&config.store, dir)?;

        let manifest = StoreManifest::load(dir)?;
        let identity = embedder.identity();
        match manifest.embedding_model.as_deref() {
            Some(built_with) if built_with != identity => {
                return Err(QaBotError::Config(format!(
                    "Index at {} was built with {} but queries would use {}",
                    dir.display(),
                    built_with,
                    identity
                )));
            }
            Some(_) => {}
            None => log::warn!("Index at {} does not record its embedding model", dir.display()),
        }

        Self::new(store, embedder, config.retrieval.clone())
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Retrieve with the configured `k`, `fetch_k` and strategy
    pub async fn retrieve(&self, question: &str, filter: Option<&MetadataFilter>) -> Result<Retrieval> {
        self.retrieve_with(question, filter, &self.config).await
    }

    /// Retrieve with explicit search parameters
    pub async fn retrieve_with(
        &self,
        question: &str,
        filter: Option<&MetadataFilter>,
        params: &RetrievalConfig,
    ) -> Result<Retrieval> {
        let filter = filter.filter(|f| !f.is_empty());
        let query = self.embedder.embed_query(question).await?;
        let k = params.k;

        let documents = match (filter, params.strategy) {
            (None, _) => self.store.nearest(&query, k, None)?,
            (Some(filter), FilterStrategy::PostFilter) => self
                .store
                .nearest(&query, params.fetch_k.max(k), None)?
                .into_iter()
                .filter(|entry| filter.matches(&entry.metadata))
                .take(k)
                .collect(),
            (Some(filter), FilterStrategy::PreFilter) => self.store.nearest(&query, k, Some(filter))?,
        };

        let shortfall = k.saturating_sub(documents.len());
        if filter.is_some() && shortfall > 0 {
            log::warn!(
                "Filter {:?} matched only {} of {} requested documents for '{}'",
                filter,
                documents.len(),
                k,
                question
            );
        }
        log::debug!("Retrieved {} documents for '{}'", documents.len(), question);

        Ok(Retrieval {
            documents,
            requested: k,
            shortfall,
            filtered: filter.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, StoreKind};
    use crate::ml::embedding::{EmbeddingBackend, EmbeddingConfig, HubEmbedder, LocalEmbedder};
    use crate::storage::{IndexEntry, create_store};
    use crate::text::document::Metadata;
    use serde_json::Value;
    use tempfile::TempDir;

    async fn build_retriever(dir: &TempDir, config: RetrievalConfig) -> Retriever {
        let embedder: Arc<dyn Embedder> =
            Arc::new(LocalEmbedder::new(EmbeddingConfig::default()).unwrap());
        let mut store = create_store(&StoreConfig::default(), dir.path(), embedder.dimension()).unwrap();

        let mut texts = Vec::new();
        let mut names = Vec::new();
        for i in 0..30 {
            texts.push(format!("Acetone exposure limit and flammability note {}", i));
            names.push("ACETONE");
        }
        for i in 0..3 {
            texts.push(format!("Acetaldehyde storage guidance {}", i));
            names.push("ACETALDEHYDE");
        }
        let embeddings = embedder.embed_documents(&texts).await.unwrap();
        let entries = texts
            .into_iter()
            .zip(names)
            .zip(embeddings)
            .enumerate()
            .map(|(i, ((text, name), embedding))| {
                let mut metadata = Metadata::new();
                metadata.insert("Name".to_string(), Value::from(name));
                IndexEntry {
                    id: format!("id-{}-1", i),
                    text,
                    metadata,
                    embedding,
                }
            })
            .collect();
        store.add_entries(entries).unwrap();

        Retriever::new(store, embedder, config).unwrap()
    }

    #[tokio::test]
    async fn test_unfiltered_returns_k() {
        let dir = TempDir::new().unwrap();
        let retriever = build_retriever(&dir, RetrievalConfig::default()).await;
        let retrieval = retriever.retrieve("acetone exposure limit", None).await.unwrap();
        assert_eq!(retrieval.documents.len(), 10);
        assert_eq!(retrieval.shortfall, 0);
        assert!(!retrieval.filtered);

        let empty = MetadataFilter::new();
        let same = retriever.retrieve("acetone exposure limit", Some(&empty)).await.unwrap();
        assert_eq!(same.texts(), retrieval.texts());
    }

    #[tokio::test]
    async fn test_post_filter_only_returns_matches() {
        let dir = TempDir::new().unwrap();
        let retriever = build_retriever(&dir, RetrievalConfig::default()).await;
        let filter = MetadataFilter::single("Name", "ACETONE");
        let retrieval = retriever.retrieve("storage guidance", Some(&filter)).await.unwrap();
        assert_eq!(retrieval.documents.len(), 10);
        assert!(retrieval.documents.iter().all(|d| d.name() == "ACETONE"));
    }

    #[tokio::test]
    async fn test_post_filter_shortfall_from_small_pool() {
        let dir = TempDir::new().unwrap();
        let config = RetrievalConfig {
            k: 3,
            fetch_k: 5,
            strategy: FilterStrategy::PostFilter,
        };
        let retriever = build_retriever(&dir, config).await;
        let filter = MetadataFilter::single("Name", "ACETALDEHYDE");

        // The five nearest to an acetone question are all acetone chunks
        let retrieval = retriever
            .retrieve("acetone exposure limit and flammability", Some(&filter))
            .await
            .unwrap();
        assert!(retrieval.documents.len() < 3);
        assert!(retrieval.shortfall > 0);
        assert_eq!(retrieval.shortfall, 3 - retrieval.documents.len());
        assert!(retrieval.documents.iter().all(|d| d.name() == "ACETALDEHYDE"));
        assert!(retrieval.filtered);
    }

    #[tokio::test]
    async fn test_post_filter_partial_pool() {
        let dir = TempDir::new().unwrap();
        let config = RetrievalConfig {
            k: 10,
            fetch_k: 33,
            strategy: FilterStrategy::PostFilter,
        };
        let retriever = build_retriever(&dir, config).await;
        let filter = MetadataFilter::single("Name", "ACETALDEHYDE");

        // Only three entries carry the name, however large the pool
        let retrieval = retriever
            .retrieve("acetaldehyde storage guidance", Some(&filter))
            .await
            .unwrap();
        assert_eq!(retrieval.documents.len(), 3);
        assert_eq!(retrieval.shortfall, 7);
    }

    #[tokio::test]
    async fn test_pre_filter_fills_k() {
        let dir = TempDir::new().unwrap();
        let config = RetrievalConfig {
            k: 3,
            fetch_k: 5,
            strategy: FilterStrategy::PreFilter,
        };
        let retriever = build_retriever(&dir, config).await;
        let filter = MetadataFilter::single("Name", "ACETALDEHYDE");
        let retrieval = retriever
            .retrieve("acetone exposure limit and flammability", Some(&filter))
            .await
            .unwrap();
        assert_eq!(retrieval.documents.len(), 3);
        assert_eq!(retrieval.shortfall, 0);
    }

    #[tokio::test]
    async fn test_unknown_name_yields_empty() {
        let dir = TempDir::new().unwrap();
        let retriever = build_retriever(&dir, RetrievalConfig::default()).await;
        let filter = MetadataFilter::single("Name", "BENZENE");
        let retrieval = retriever.retrieve("anything", Some(&filter)).await.unwrap();
        assert!(retrieval.is_empty());
        assert_eq!(retrieval.shortfall, 10);
        assert_eq!(retrieval.context(), "");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> =
            Arc::new(LocalEmbedder::new(EmbeddingConfig::default()).unwrap());
        let config = StoreConfig {
            kind: StoreKind::Flat,
            ..Default::default()
        };
        let store = create_store(&config, dir.path(), 8).unwrap();
        assert!(Retriever::new(store, embedder, RetrievalConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_other_embedding_backend() {
        let dir = TempDir::new().unwrap();
        let local_config = EmbeddingConfig::default();
        let local = LocalEmbedder::new(local_config.clone()).unwrap();

        let mut store = create_store(&StoreConfig::default(), dir.path(), local.dimension()).unwrap();
        let texts = vec!["Acetone is flammable".to_string()];
        let embedding = local.embed_documents(&texts).await.unwrap().remove(0);
        store
            .add_entries(vec![IndexEntry {
                id: "id-0-1".to_string(),
                text: texts[0].clone(),
                metadata: Metadata::new(),
                embedding,
            }])
            .unwrap();
        store.set_embedding_model(&local.identity());
        store.persist().unwrap();

        let mut config = Config::default();
        config.paths.vector_persist_dir = dir.path().to_path_buf();

        let hub_config = EmbeddingConfig {
            backend: EmbeddingBackend::Hub,
            ..local_config
        };
        let hub: Arc<dyn Embedder> = Arc::new(HubEmbedder::new(hub_config, None).unwrap());
        assert_eq!(hub.dimension(), local.dimension());
        let err = Retriever::open(&config, hub).err().unwrap();
        assert!(matches!(err, QaBotError::Config(_)));

        assert!(Retriever::open(&config, Arc::new(local)).is_ok());
    }
}
