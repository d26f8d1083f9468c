//! File-system model registry
//!
//! Versions are catalogued in `<root>/registry.db` and each registered
//! artifact is copied to `<root>/<name>/<version>`.

use crate::error::{QaBotError, Result};
use crate::registry::{ModelReference, ModelRegistry, ModelVersion, Stage, parse_model_uri};
use crate::utils::{copy_dir_recursive, ensure_directory, sanitize_filename};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const REGISTRY_DB: &str = "registry.db";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS registered_models (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS model_versions (
    name TEXT NOT NULL REFERENCES registered_models(name),
    version INTEGER NOT NULL,
    stage TEXT NOT NULL DEFAULT 'None',
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (name, version)
);
CREATE INDEX IF NOT EXISTS idx_model_versions_stage ON model_versions(name, stage);
"#;

type VersionRow = (String, u32, String, String, String);

/// Registry kept under a local directory
pub struct LocalRegistry {
    root: PathBuf,
    conn: Mutex<Connection>,
}

impl LocalRegistry {
    pub fn open(root: &Path) -> Result<Self> {
        ensure_directory(root)?;
        let conn = Connection::open(root.join(REGISTRY_DB))
            .map_err(|e| QaBotError::Registry(format!("Failed to open registry: {}", e)))?;
        conn.execute_batch(CREATE_TABLES)?;

        log::debug!("Opened model registry at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact directory a `models:/<name>/<stage|version>` URI points at
    pub fn resolve_uri(&self, uri: &str) -> Result<PathBuf> {
        let (name, reference) = parse_model_uri(uri)?;
        let version = match reference {
            ModelReference::Version(version) => self.version(&name, version)?,
            ModelReference::Stage(stage) => self
                .latest(&name, &[stage])?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    QaBotError::Registry(format!("{} has no version in stage {}", name, stage))
                })?,
        };
        Ok(PathBuf::from(version.source))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QaBotError::Registry("Registry connection lock poisoned".to_string()))
    }

    fn register_sync(&self, name: &str, source: &Path) -> Result<ModelVersion> {
        if !source.is_dir() {
            return Err(QaBotError::Registry(format!(
                "Artifact directory {} does not exist",
                source.display()
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "INSERT OR IGNORE INTO registered_models (name, created_at) VALUES (?1, ?2)",
            params![name, now.to_rfc3339()],
        )?;
        let version: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM model_versions WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        let dest = self
            .root
            .join(sanitize_filename(name))
            .join(version.to_string());
        copy_dir_recursive(source, &dest)?;
        let dest = dest.to_string_lossy().to_string();

        tx.execute(
            "INSERT INTO model_versions (name, version, stage, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, version, Stage::None.as_str(), dest, now.to_rfc3339()],
        )?;
        tx.commit()?;

        log::info!("Registered {} version {}", name, version);
        Ok(ModelVersion {
            name: name.to_string(),
            version,
            stage: Stage::None,
            source: dest,
            created_at: now,
        })
    }

    fn ensure_model(conn: &Connection, name: &str) -> Result<()> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM registered_models WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        exists.ok_or_else(|| QaBotError::Registry(format!("Model {} is not registered", name)))
    }

    fn latest(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let conn = self.lock()?;
        Self::ensure_model(&conn, name)?;

        let stages: &[Stage] = if stages.is_empty() { &Stage::ALL } else { stages };
        let mut stmt = conn.prepare(
            "SELECT name, version, stage, source, created_at FROM model_versions
             WHERE name = ?1 AND stage = ?2 ORDER BY version DESC LIMIT 1",
        )?;

        let mut versions = Vec::new();
        for stage in stages {
            let row = stmt
                .query_row(params![name, stage.as_str()], read_row)
                .optional()?;
            if let Some(row) = row {
                versions.push(into_version(row)?);
            }
        }
        Ok(versions)
    }

    fn version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        let conn = self.lock()?;
        Self::fetch_version(&conn, name, version)
    }

    fn fetch_version(conn: &Connection, name: &str, version: u32) -> Result<ModelVersion> {
        let row = conn
            .query_row(
                "SELECT name, version, stage, source, created_at FROM model_versions
                 WHERE name = ?1 AND version = ?2",
                params![name, version],
                read_row,
            )
            .optional()?
            .ok_or_else(|| QaBotError::Registry(format!("{} version {} not found", name, version)))?;
        into_version(row)
    }

    fn transition_sync(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::fetch_version(&tx, name, version)?;

        if archive_existing && matches!(stage, Stage::Staging | Stage::Production) {
            let archived = tx.execute(
                "UPDATE model_versions SET stage = ?1
                 WHERE name = ?2 AND stage = ?3 AND version != ?4",
                params![Stage::Archived.as_str(), name, stage.as_str(), version],
            )?;
            if archived > 0 {
                log::info!("Archived {} previous {} version(s) of {}", archived, stage, name);
            }
        }
        tx.execute(
            "UPDATE model_versions SET stage = ?1 WHERE name = ?2 AND version = ?3",
            params![stage.as_str(), name, version],
        )?;
        let updated = Self::fetch_version(&tx, name, version)?;
        tx.commit()?;

        log::info!("{} version {} is now in stage {}", name, version, stage);
        Ok(updated)
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_version((name, version, stage, source, created_at): VersionRow) -> Result<ModelVersion> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| QaBotError::Registry(format!("Bad timestamp '{}': {}", created_at, e)))?
        .with_timezone(&Utc);
    Ok(ModelVersion {
        name,
        version,
        stage: stage.parse()?,
        source,
        created_at,
    })
}

#[async_trait]
impl ModelRegistry for LocalRegistry {
    async fn register(&self, name: &str, source: &str) -> Result<ModelVersion> {
        self.register_sync(name, Path::new(source))
    }

    async fn latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        self.latest(name, stages)
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        self.transition_sync(name, version, stage, archive_existing)
    }

    async fn get_version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        self.version(name, version)
    }
}
