//! Text processing for sds-qabot
//!
//! Document loading, cleanup, metadata extraction and chunking.

pub mod chunking;
pub mod document;
pub mod metadata;
pub mod pdf;

// Re-export main types and functions
pub use chunking::TextChunker;
pub use document::{Chunk, Document, Metadata};
pub use metadata::{ExtractedMetadata, MetadataExtractor, clean_text};
pub use pdf::{PdfProcessor, load_documents};
