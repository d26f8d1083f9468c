//! Documents and chunks
//!
//! A [`Document`] is one page of source text with its location metadata.
//! A [`Chunk`] is a bounded slice of a document ready for embedding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata attached to documents, chunks and index entries
pub type Metadata = BTreeMap<String, Value>;

/// Filterable chemical name extracted from the document
pub const NAME_KEY: &str = "Name";
/// File the document was loaded from
pub const SOURCE_KEY: &str = "source";
/// Absolute path of the source file as it was found in the data directory
pub const SOURCE_PATH_KEY: &str = "source_path";
/// Zero-based page number
pub const PAGE_KEY: &str = "page";

/// One page of text plus its source-location metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub page_content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            page_content: page_content.into(),
            metadata,
        }
    }

    /// Build a page document with `source` and `page` metadata
    pub fn page(page_content: impl Into<String>, source: &str, page: u32) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), Value::String(source.to_string()));
        metadata.insert(PAGE_KEY.to_string(), Value::from(page));
        Self::new(page_content, metadata)
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(Value::as_str)
    }

    pub fn page_number(&self) -> Option<u32> {
        self.metadata
            .get(PAGE_KEY)
            .and_then(Value::as_u64)
            .map(|p| p as u32)
    }
}

/// A chunk of a document with its index identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique within one ingestion run
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// The extracted chemical name, `""` when none was found
    pub fn name(&self) -> &str {
        self.metadata
            .get(NAME_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Identifier for the `chunk_index`-th chunk of the `doc_index`-th directory entry
pub fn chunk_id(chunk_index: usize, doc_index: usize) -> String {
    format!("id-{}-{}", chunk_index, doc_index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_document_metadata() {
        let doc = Document::page("text", "/data/acetone.pdf", 2);
        assert_eq!(doc.source(), Some("/data/acetone.pdf"));
        assert_eq!(doc.page_number(), Some(2));
    }

    #[test]
    fn test_chunk_ids() {
        assert_eq!(chunk_id(0, 0), "id-0-1");
        assert_eq!(chunk_id(12, 3), "id-12-4");
        assert_ne!(chunk_id(1, 11), chunk_id(11, 1));
    }

    #[test]
    fn test_chunk_name_defaults_to_empty() {
        let chunk = Chunk {
            id: "id-0-1".to_string(),
            text: "text".to_string(),
            metadata: Metadata::new(),
        };
        assert_eq!(chunk.name(), "");
    }
}
