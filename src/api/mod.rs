//! API layer for sds-qabot
//!
//! Ingestion builds the index, the retriever searches it and the bot turns
//! retrieved chunks into answers.

pub mod bot;
pub mod ingest;
pub mod retriever;

// Re-export main API types
pub use bot::{Answer, PredictFrame, QaBot};
pub use ingest::{IngestStats, IngestedDocument, Ingestor};
pub use retriever::{Retrieval, Retriever};
