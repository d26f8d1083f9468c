//! # sds-qabot
//!
//! Question answering over chemical safety data sheets. PDF fact sheets are
//! split into overlapping chunks, tagged with the chemical's common name,
//! embedded into a vector index and answered from with a text-generation
//! model that only sees the retrieved chunks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sds_qabot::{Config, Ingestor, MetadataFilter, QaBot, Retriever, build_embedder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let embedder = build_embedder(&config.embedding, None)?;
//!
//!     // Build the index from the data directory
//!     let stats = Ingestor::new(config.clone(), embedder.clone())?.run().await?;
//!     println!("Indexed {} chunks", stats.chunks);
//!
//!     // Ask questions about one chemical
//!     let retriever = Retriever::open(&config, embedder)?;
//!     let mut bot = QaBot::new(config, retriever, None);
//!     bot.initialize()?;
//!
//!     let filter = MetadataFilter::single("Name", "ACETONE");
//!     let answer = bot.answer("What are the exposure limits?", Some(&filter)).await?;
//!     println!("{}", answer.text);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ml;
pub mod registry;
pub mod storage;
pub mod text;
pub mod utils;

// Re-export main API types
pub use api::{Answer, IngestStats, Ingestor, PredictFrame, QaBot, Retrieval, Retriever};
pub use config::Config;
pub use error::{QaBotError, Result};

// Re-export commonly used types
pub use ml::{Embedder, TextGenerator, build_embedder, build_generator};
pub use registry::{ModelArtifact, ModelRegistry, ModelVersion, Stage};
pub use storage::{MetadataFilter, ScoredEntry, VectorStore};
pub use text::{Chunk, Document};
