//! SQLite schema for the vector collection

/// Collection schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Database file inside the index directory
pub const COLLECTION_FILE: &str = "collection.db";

/// Entries in insertion order; `metadata` is a JSON object
pub const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL
);
"#;

/// Key/value facts about the collection
pub const CREATE_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS collection_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// The common-name filter is by far the most frequent one
pub const CREATE_ENTRIES_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(json_extract(metadata, '$.Name'));
"#;
