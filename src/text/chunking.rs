//! Recursive character text splitting
//!
//! Text is split on the coarsest separator present (paragraphs, then lines,
//! then words, then characters), and the pieces are greedily merged back into
//! chunks of at most `chunk_size` characters. Consecutive chunks repeat the
//! tail of their predecessor so that context survives chunk boundaries.

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::text::document::Document;
use std::collections::VecDeque;

/// Separators tried in order; the empty separator splits into characters
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits documents into overlapping chunks
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl TextChunker {
    /// Create a new text chunker with the given configuration
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        Self::with_separators(
            config,
            DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Create a chunker with a custom separator hierarchy
    pub fn with_separators(config: ChunkingConfig, separators: Vec<String>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, separators })
    }

    /// Create a chunker with default configuration
    pub fn with_default_config() -> Result<Self> {
        Self::new(ChunkingConfig::default())
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split each document separately; chunks inherit the page metadata
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.page_content)
                    .into_iter()
                    .map(|chunk| Document::new(chunk, doc.metadata.clone()))
            })
            .collect()
    }

    /// Split text into chunks of at most `chunk_size` characters
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // Pick the first separator that occurs in the text
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits = split_keeping_separator(text, separator);
        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for split in splits {
            if char_len(split) < self.config.chunk_size {
                pending.push(split);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_splits(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(split.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(split, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_splits(&pending));
        }

        chunks
    }

    /// Greedily pack pieces into chunks, carrying an overlap tail forward
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > chunk_size && !current.is_empty() {
                if let Some(doc) = join_pieces(&current) {
                    docs.push(doc);
                }

                // Keep the shortest tail that still holds `overlap` characters
                // once trimmed, as long as the next piece fits after it.
                while let Some(first) = current.front() {
                    let remaining = total - char_len(first);
                    let leading = current.get(1).map(|s| leading_whitespace(s)).unwrap_or(0);
                    let fits = total + len <= chunk_size;
                    if remaining.saturating_sub(leading) >= overlap || !fits {
                        current.pop_front();
                        total = remaining;
                    } else {
                        break;
                    }
                }
            }

            current.push_back(split);
            total += len;
        }

        if let Some(doc) = join_pieces(&current) {
            docs.push(doc);
        }

        log::debug!(
            "Merged {} pieces into {} chunks (size {}, overlap {})",
            splits.len(),
            docs.len(),
            chunk_size,
            overlap
        );
        docs
    }
}

/// Split so that every separator stays attached to the piece that follows it
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn join_pieces(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn leading_whitespace(text: &str) -> usize {
    text.chars().take_while(|c| c.is_whitespace()).count()
}
