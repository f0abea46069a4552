//! Persistence of analysed documents.
//!
//! The analyzer only needs "save these fields, give me the record back"; the
//! store decides where records live. Saves are not idempotent: every call
//! creates a new record with a fresh id.

use crate::output::{DocumentFields, SavedRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Why a save did not happen.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The backing store refused the record.
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Destination for analysis results when `auto_save` is requested.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist `fields` as a new record.
    async fn save(&self, fields: &DocumentFields) -> Result<SavedRecord, StoreError>;
}

/// One pretty-printed JSON file per record, `<dir>/<uuid>.json`.
///
/// Writes go to a `.tmp` sibling first and are renamed into place, so a
/// reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Read a record back.
    pub async fn load(&self, id: &Uuid) -> Result<SavedRecord, StoreError> {
        let bytes = tokio::fs::read(self.record_path(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl DocumentStore for JsonDirStore {
    async fn save(&self, fields: &DocumentFields) -> Result<SavedRecord, StoreError> {
        let record = SavedRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            fields: fields.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.record_path(&record.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved record {} → {}", record.id, path.display());
        Ok(record)
    }
}
