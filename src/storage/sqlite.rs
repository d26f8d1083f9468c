//! Vector collection in an embedded SQLite database
//!
//! Metadata lives in a JSON column so that filters are evaluated by SQLite
//! (`json_extract`) before any distance is computed.

use crate::config::{StoreConfig, StoreKind};
use crate::error::{QaBotError, Result};
use crate::ml::embedding::Embedding;
use crate::storage::schema::*;
use crate::storage::{
    DistanceMetric, IndexEntry, MetadataFilter, ScoredEntry, StoreManifest, VectorStore,
    check_dimension,
};
use crate::text::document::Metadata;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed [`VectorStore`]
pub struct SqliteStore {
    dir: PathBuf,
    conn: Mutex<Connection>,
    metric: DistanceMetric,
    dimension: usize,
    count: usize,
    embedding_model: Option<String>,
}

impl SqliteStore {
    /// Create a fresh collection in `dir`, replacing any previous one
    pub fn create(config: &StoreConfig, dir: &Path, dimension: usize) -> Result<Self> {
        let path = dir.join(COLLECTION_FILE);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let conn = Self::connect(&path)?;
        conn.execute(
            "INSERT OR REPLACE INTO collection_info (key, value) VALUES ('dimension', ?1)",
            params![dimension.to_string()],
        )?;

        Ok(Self {
            dir: dir.to_path_buf(),
            conn: Mutex::new(conn),
            metric: config.metric,
            dimension,
            count: 0,
            embedding_model: None,
        })
    }

    /// Open a persisted collection
    pub fn open(dir: &Path, manifest: StoreManifest) -> Result<Self> {
        let path = dir.join(COLLECTION_FILE);
        if !path.exists() {
            return Err(QaBotError::Store(format!("Missing {}", path.display())));
        }
        let conn = Self::connect(&path)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        log::info!("Opened SQLite collection {} with {} entries", path.display(), count);

        Ok(Self {
            dir: dir.to_path_buf(),
            conn: Mutex::new(conn),
            metric: manifest.metric,
            dimension: manifest.dimension,
            count: count as usize,
            embedding_model: manifest.embedding_model,
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .map_err(|e| QaBotError::Store(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrency
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| QaBotError::Store(format!("Failed to enable WAL mode: {}", e)))?;

        conn.execute_batch(CREATE_ENTRIES_TABLE)?;
        conn.execute_batch(CREATE_INFO_TABLE)?;
        conn.execute_batch(CREATE_ENTRIES_INDEXES)?;
        conn.execute(
            "INSERT OR REPLACE INTO collection_info (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QaBotError::Store("SQLite connection lock poisoned".to_string()))
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn decode_embedding(blob: &[u8]) -> Embedding {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// SQL parameter a `json_extract` result is compared against
fn filter_param(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::Null => SqlValue::Null,
        other => SqlValue::Text(other.to_string()),
    }
}

fn json_path(key: &str) -> String {
    if key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("$.{}", key)
    } else {
        format!("$.\"{}\"", key.replace('"', "\\\""))
    }
}

impl VectorStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.count
    }

    fn add_entries(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            check_dimension(self.dimension, entry.embedding.len(), "Vector")?;
        }

        let added = entries.len();
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO entries (id, text, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in &entries {
                    let metadata = serde_json::to_string(&entry.metadata)?;
                    stmt.execute(params![
                        entry.id,
                        entry.text,
                        metadata,
                        encode_embedding(&entry.embedding)
                    ])
                    .map_err(|e| {
                        QaBotError::Store(format!("Failed to insert {}: {}", entry.id, e))
                    })?;
                }
            }
            tx.commit()?;
        }

        self.count += added;
        log::debug!("Inserted {} entries into SQLite collection", added);
        Ok(())
    }

    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        check_dimension(self.dimension, query.len(), "Query")?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = "SELECT id, text, metadata, embedding FROM entries".to_string();
        let mut bindings = Vec::new();
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            let clauses: Vec<String> = filter
                .iter()
                .map(|(key, value)| {
                    bindings.push(SqlValue::Text(json_path(key)));
                    if value.is_null() {
                        "json_extract(metadata, ?) IS NULL".to_string()
                    } else {
                        bindings.push(filter_param(value));
                        "json_extract(metadata, ?) = ?".to_string()
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY seq");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, text, metadata, blob) = row?;
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            // SQLite compares loosely; confirm with JSON equality
            if filter.is_some_and(|f| !f.matches(&metadata)) {
                continue;
            }
            let distance = self.metric.distance(query, &decode_embedding(&blob));
            scored.push(ScoredEntry {
                id,
                text,
                metadata,
                distance,
            });
        }

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(limit);
        Ok(scored)
    }

    fn ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM entries ORDER BY seq")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn set_embedding_model(&mut self, model_name: &str) {
        self.embedding_model = Some(model_name.to_string());
    }

    fn persist(&mut self) -> Result<()> {
        {
            let conn = self.lock()?;
            let _: (i64, i64, i64) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        }
        StoreManifest {
            kind: StoreKind::Sqlite,
            metric: self.metric,
            dimension: self.dimension,
            count: self.count,
            embedding_model: self.embedding_model.clone(),
            updated_at: Utc::now(),
        }
        .save(&self.dir)?;
        log::info!("Persisted SQLite collection with {} entries", self.count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{create_store, open_store};
    use tempfile::TempDir;

    fn entry(id: &str, name: &str, page: u32, embedding: Vec<f32>) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("Name".to_string(), Value::from(name));
        metadata.insert("page".to_string(), Value::from(page));
        IndexEntry {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata,
            embedding,
        }
    }

    fn sqlite_config() -> StoreConfig {
        StoreConfig {
            kind: StoreKind::Sqlite,
            ..Default::default()
        }
    }

    fn populated(dir: &Path) -> Box<dyn VectorStore> {
        let mut store = create_store(&sqlite_config(), dir, 2).unwrap();
        store
            .add_entries(vec![
                entry("id-0-1", "ACETONE", 0, vec![1.0, 0.0]),
                entry("id-1-1", "ACETONE", 1, vec![0.7, 0.7]),
                entry("id-0-2", "ACETALDEHYDE", 0, vec![0.0, 1.0]),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("Name"), "$.Name");
        assert_eq!(json_path("source path"), "$.\"source path\"");
    }

    #[test]
    fn test_embedding_blob() {
        let embedding = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&embedding)), embedding);
    }

    #[test]
    fn test_nearest_with_pushdown_filter() {
        let dir = TempDir::new().unwrap();
        let store = populated(dir.path());
        assert_eq!(store.len(), 3);

        let all = store.nearest(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(all.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["id-0-1", "id-1-1", "id-0-2"]);

        let filter = MetadataFilter::single("Name", "ACETALDEHYDE");
        let hits = store.nearest(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "id-0-2");

        let by_page: MetadataFilter = [("Name", Value::from("ACETONE")), ("page", Value::from(1))]
            .into_iter()
            .collect();
        let hits = store.nearest(&[1.0, 0.0], 10, Some(&by_page)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "id-1-1");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = populated(dir.path());
        let err = store
            .add_entries(vec![entry("id-0-1", "ACETONE", 0, vec![1.0, 0.0])])
            .unwrap_err();
        assert!(err.to_string().contains("id-0-1"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_persist_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = populated(dir.path());
        store.persist().unwrap();
        drop(store);

        let reopened = open_store(&sqlite_config(), dir.path()).unwrap();
        assert_eq!(reopened.kind(), StoreKind::Sqlite);
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.ids().unwrap(), vec!["id-0-1", "id-1-1", "id-0-2"]);
    }
}
