//! Ingestion pipeline
//!
//! Reads every supported file in the data directory in sorted order, cleans
//! each page, extracts the common name, splits the pages into chunks, embeds
//! them and writes the vector index to `paths.vector_persist_dir`.

use crate::config::Config;
use crate::error::{QaBotError, Result};
use crate::ml::embedding::Embedder;
use crate::storage::{IndexEntry, VectorStore, create_store};
use crate::text::document::{Chunk, Document, SOURCE_KEY, SOURCE_PATH_KEY, chunk_id};
use crate::text::{MetadataExtractor, TextChunker, clean_text, load_documents};
use crate::utils::{directory_size, is_supported_document, list_directory_sorted, reset_directory};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ingestion statistics
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Files that produced at least one page
    pub documents: usize,
    /// Directory entries that were not supported documents
    pub skipped: usize,
    pub pages: usize,
    pub chunks: usize,
    /// Documents whose common name was found
    pub named_documents: usize,
    /// Total processing time in seconds
    pub processing_time: f64,
    pub index_dir: PathBuf,
    /// Bytes written to the index directory
    pub index_bytes: u64,
}

/// Builds the vector index from a directory of safety data sheets
pub struct Ingestor {
    config: Config,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
    extractor: MetadataExtractor,
    store: Option<Box<dyn VectorStore>>,
}

impl Ingestor {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let chunker = TextChunker::new(config.chunking.clone())?;
        let extractor = MetadataExtractor::new()?;
        Ok(Self {
            config,
            embedder,
            chunker,
            extractor,
            store: None,
        })
    }

    /// Run the whole pipeline
    pub async fn run(&mut self) -> Result<IngestStats> {
        self.run_with_progress(|_, _, _| {}).await
    }

    /// Run the pipeline, reporting `(done, total, path)` after every entry
    pub async fn run_with_progress<F>(&mut self, mut progress: F) -> Result<IngestStats>
    where
        F: FnMut(usize, usize, &Path),
    {
        let start_time = std::time::Instant::now();
        let data_dir = self.config.paths.data_dir.clone();
        let index_dir = self.config.paths.vector_persist_dir.clone();

        reset_directory(&index_dir)?;
        self.store = None;

        let entries = list_directory_sorted(&data_dir).map_err(|e| {
            QaBotError::Config(format!("Cannot read data directory {}: {}", data_dir.display(), e))
        })?;
        log::info!("Ingesting {} entries from {}", entries.len(), data_dir.display());

        let mut stats = IngestStats {
            index_dir: index_dir.clone(),
            ..Default::default()
        };

        for (doc_index, path) in entries.iter().enumerate() {
            if !path.is_file() || !is_supported_document(path) {
                log::warn!("Skipping unsupported entry {}", path.display());
                stats.skipped += 1;
                progress(doc_index + 1, entries.len(), path);
                continue;
            }

            let ingested = self.ingest_document(path, doc_index)?;
            stats.documents += 1;
            stats.pages += ingested.pages;
            if ingested.name.is_some() {
                stats.named_documents += 1;
            }
            stats.chunks += self.index_chunks(ingested.chunks).await?;
            progress(doc_index + 1, entries.len(), path);
        }

        let store = self.store.as_mut().ok_or_else(|| {
            QaBotError::TextProcessing(format!("No documents found in {}", data_dir.display()))
        })?;
        store.set_embedding_model(&self.embedder.identity());
        store.persist()?;
        stats.index_bytes = directory_size(&index_dir)?;

        stats.processing_time = start_time.elapsed().as_secs_f64();
        log::info!(
            "Indexed {} chunks from {} documents in {:.2}s",
            stats.chunks,
            stats.documents,
            stats.processing_time
        );
        Ok(stats)
    }

    /// Load, clean, tag and split one file.
    ///
    /// `doc_index` is the file's position in the sorted directory listing.
    pub fn ingest_document(&self, path: &Path, doc_index: usize) -> Result<IngestedDocument> {
        let mut pages = load_documents(path)?;

        let mut scanner = self.extractor.scanner();
        for page in &mut pages {
            page.page_content = clean_text(&page.page_content);
            scanner.scan(&page.page_content);
        }
        let extracted = scanner.finish();
        match &extracted.name {
            Some(name) => log::debug!("{} is the fact sheet for {}", path.display(), name),
            None => log::debug!("No common name in {}", path.display()),
        }

        let source_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string();

        let chunks = self
            .chunker
            .split_documents(&pages)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, Document { page_content, mut metadata })| {
                metadata.insert(SOURCE_KEY.to_string(), Value::String(path.to_string_lossy().to_string()));
                metadata.insert(SOURCE_PATH_KEY.to_string(), Value::String(source_path.clone()));
                extracted.apply(&mut metadata);
                Chunk {
                    id: chunk_id(chunk_index, doc_index),
                    text: page_content,
                    metadata,
                }
            })
            .collect::<Vec<_>>();

        log::info!(
            "{}: {} pages, {} chunks",
            path.display(),
            pages.len(),
            chunks.len()
        );
        Ok(IngestedDocument {
            path: path.to_path_buf(),
            pages: pages.len(),
            name: extracted.name,
            chunks,
        })
    }

    /// Embed chunks and add them to the index, creating it on first use
    pub async fn index_chunks(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(QaBotError::Embedding(format!(
                "Embedded {} of {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        if self.store.is_none() {
            self.store = Some(create_store(
                &self.config.store,
                &self.config.paths.vector_persist_dir,
                self.embedder.dimension(),
            )?);
        }
        let Some(store) = self.store.as_mut() else {
            return Err(QaBotError::Store("Index was not created".to_string()));
        };

        let count = chunks.len();
        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry::from_chunk(chunk, embedding))
            .collect();
        store.add_entries(entries)?;
        Ok(count)
    }

    /// The index built so far
    pub fn store(&self) -> Option<&dyn VectorStore> {
        self.store.as_deref()
    }

    /// Hand over the built index
    pub fn into_store(self) -> Option<Box<dyn VectorStore>> {
        self.store
    }
}

/// One file after loading and chunking
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub path: PathBuf,
    pub pages: usize,
    pub name: Option<String>,
    pub chunks: Vec<Chunk>,
}
