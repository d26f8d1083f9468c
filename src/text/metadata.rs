//! Safety-data-sheet metadata extraction and text cleanup
//!
//! Fact sheets carry a `Common Name:` field followed by one of a handful of
//! other labels. The value between them becomes the filterable `Name`
//! attribute of every chunk cut from that sheet.

use crate::error::{QaBotError, Result};
use crate::text::document::{Metadata, NAME_KEY};
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

/// Label introducing the chemical name
pub const COMMON_NAME_LABEL: &str = "Common Name:";

/// Labels that may follow the common name on a fact sheet
pub const TERMINATING_LABELS: [&str; 5] = [
    "Synonyms:",
    "Chemical Name:",
    "Date:",
    "CAS Number:",
    "DOT Number:",
];

/// Glyph some PDF producers emit for bullet points
const PRIVATE_USE_BULLET: char = '\u{f084}';

/// Result of scanning one text segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub name: Option<String>,
}

impl ExtractedMetadata {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    /// Write the `Name` attribute, defaulting to `""`
    pub fn apply(&self, metadata: &mut Metadata) {
        let name = self.name.clone().unwrap_or_default();
        metadata.insert(NAME_KEY.to_string(), Value::String(name));
    }
}

/// Locates the common name in cleaned fact-sheet text
pub struct MetadataExtractor {
    common_name: Regex,
}

impl MetadataExtractor {
    pub fn new() -> Result<Self> {
        let terminators = TERMINATING_LABELS
            .iter()
            .map(|label| regex::escape(label))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("{}(.*?)(?:{})", regex::escape(COMMON_NAME_LABEL), terminators);

        let common_name = Regex::new(&pattern).map_err(|e| {
            QaBotError::TextProcessing(format!("Failed to compile common name regex: {}", e))
        })?;

        Ok(Self { common_name })
    }

    /// Extract the common name from one segment of text
    pub fn extract(&self, text: &str) -> ExtractedMetadata {
        if !text.contains(COMMON_NAME_LABEL) {
            return ExtractedMetadata::default();
        }

        let name = self
            .common_name
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        ExtractedMetadata { name }
    }

    /// Start a first-match-wins scan over the pages of one document
    pub fn scanner(&self) -> DocumentMetadataScanner<'_> {
        DocumentMetadataScanner {
            extractor: self,
            found: ExtractedMetadata::default(),
        }
    }
}

/// Scans pages in order and keeps the first name found.
///
/// Later pages are not looked at once a name is known, even if they carry a
/// different one.
pub struct DocumentMetadataScanner<'a> {
    extractor: &'a MetadataExtractor,
    found: ExtractedMetadata,
}

impl DocumentMetadataScanner<'_> {
    pub fn scan(&mut self, page_text: &str) {
        if self.found.is_empty() {
            self.found = self.extractor.extract(page_text);
        }
    }

    pub fn found(&self) -> &ExtractedMetadata {
        &self.found
    }

    pub fn finish(self) -> ExtractedMetadata {
        self.found
    }
}

/// Flatten line breaks, drop bullet glyphs and fold compatibility characters
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", " ")
        .chars()
        .filter(|c| *c != PRIVATE_USE_BULLET)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .nfkc()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACETONE_PAGE: &str = "Right to Know Hazardous Substance Fact Sheet Common Name: ACETONE Synonyms: Dimethyl Ketone; 2-Propanone CAS Number: 67-64-1";

    #[test]
    fn test_extract_common_name() {
        let extractor = MetadataExtractor::new().unwrap();
        let extracted = extractor.extract(ACETONE_PAGE);
        assert_eq!(extracted.name.as_deref(), Some("ACETONE"));

        let mut metadata = Metadata::new();
        extracted.apply(&mut metadata);
        assert_eq!(metadata.get("Name"), Some(&Value::String("ACETONE".to_string())));
    }

    #[test]
    fn test_each_terminating_label() {
        let extractor = MetadataExtractor::new().unwrap();
        for label in TERMINATING_LABELS {
            let text = format!("Common Name:  ACETALDEHYDE  {} something", label);
            assert_eq!(
                extractor.extract(&text).name.as_deref(),
                Some("ACETALDEHYDE"),
                "terminator {}",
                label
            );
        }
    }

    #[test]
    fn test_stops_at_nearest_label() {
        let extractor = MetadataExtractor::new().unwrap();
        let text = "Common Name: ACETYL METHYL CARBINOL Date: May 2002 Synonyms: Acetoin";
        assert_eq!(
            extractor.extract(text).name.as_deref(),
            Some("ACETYL METHYL CARBINOL")
        );
    }

    #[test]
    fn test_missing_label_yields_empty() {
        let extractor = MetadataExtractor::new().unwrap();
        let extracted = extractor.extract("Workplace exposure limits for solvents");
        assert!(extracted.is_empty());

        let mut metadata = Metadata::new();
        extracted.apply(&mut metadata);
        assert_eq!(metadata.get("Name"), Some(&Value::String(String::new())));
    }

    #[test]
    fn test_label_without_terminator_yields_empty() {
        let extractor = MetadataExtractor::new().unwrap();
        assert!(extractor.extract("Common Name: ACETONE and nothing else").is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let extractor = MetadataExtractor::new().unwrap();
        let mut scanner = extractor.scanner();
        scanner.scan("Cover page without the label");
        assert!(scanner.found().is_empty());
        scanner.scan(ACETONE_PAGE);
        scanner.scan("Common Name: BENZENE Synonyms: Benzol");
        assert_eq!(scanner.finish().name.as_deref(), Some("ACETONE"));
    }

    #[test]
    fn test_clean_text() {
        let raw = "Common Name:\nACETONE\r\n\u{f084} Flammable ﬁre hazard";
        let cleaned = clean_text(raw);
        assert_eq!(cleaned, "Common Name: ACETONE  Flammable fire hazard");
        assert!(!cleaned.contains('\n'));
    }
}
