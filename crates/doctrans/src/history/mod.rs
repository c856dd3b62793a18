//! Durable job history.
//!
//! The queue mirrors every status, progress and log mutation into a
//! [`HistoryStore`] keyed by job id. Writes are upserts: fields left `None`
//! in a [`HistoryPatch`] are not touched.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;
use crate::metadata::DocumentMetadata;
use crate::worker::job::{JobRecord, JobStatus, SourceType};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

/// Persistent backing for job history.
///
/// Calls are synchronous and expected to be short; the queue invokes them
/// from its dispatch task.
pub trait HistoryStore: Send + Sync {
    /// All entries, newest first.
    fn list(&self) -> Result<Vec<HistoryEntry>, DatabaseError>;

    fn get(&self, id: &str) -> Result<Option<HistoryEntry>, DatabaseError>;

    /// Inserts a new entry. Inserting an id that already exists is an error.
    fn append(&self, entry: HistoryEntry) -> Result<(), DatabaseError>;

    /// Applies `patch` to an existing entry. Returns false when no entry
    /// has that id; nothing is inserted in that case.
    fn upsert(&self, id: &str, patch: &HistoryPatch) -> Result<bool, DatabaseError>;

    /// Returns whether an entry was removed.
    fn remove(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// A persisted job plus the document metadata captured when it first ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub source_path: PathBuf,
    pub original_name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_record(record: &JobRecord, metadata: DocumentMetadata) -> Self {
        Self {
            id: record.id.clone(),
            source_path: record.source_path.clone(),
            original_name: record.original_name.clone(),
            source_type: record.source_type,
            download_id: record.download_id.clone(),
            status: record.status,
            progress: record.progress,
            logs: record.logs.iter().cloned().collect(),
            output_dir: record.output_dir.clone(),
            save_path: record.save_path.clone(),
            error: record.error.clone(),
            metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    /// Rebuilds a job record from history, e.g. for a job from a previous
    /// session that is no longer in the in-memory queue.
    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id.clone(),
            source_path: self.source_path.clone(),
            original_name: self.original_name.clone(),
            source_type: self.source_type,
            download_id: self.download_id.clone(),
            status: self.status,
            progress: self.progress,
            logs: self.logs.iter().cloned().collect::<VecDeque<_>>(),
            output_dir: self.output_dir.clone(),
            save_path: self.save_path.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Applies the fields present in `patch` and bumps `updated_at`.
    pub fn apply(&mut self, patch: &HistoryPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(logs) = &patch.logs {
            self.logs = logs.clone();
        }
        if let Some(output_dir) = &patch.output_dir {
            self.output_dir = output_dir.clone();
        }
        if let Some(save_path) = &patch.save_path {
            self.save_path = Some(save_path.clone());
        }
        if let Some(error) = &patch.error {
            self.error = error.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for a history entry. `None` means "leave unchanged";
/// for nullable columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub logs: Option<Vec<String>>,
    pub output_dir: Option<Option<PathBuf>>,
    pub save_path: Option<PathBuf>,
    pub error: Option<Option<String>>,
}

impl HistoryPatch {
    /// Status, progress, output and error as currently held by `record`.
    pub fn state_of(record: &JobRecord) -> Self {
        Self {
            status: Some(record.status),
            progress: Some(record.progress),
            output_dir: Some(record.output_dir.clone()),
            error: Some(record.error.clone()),
            ..Default::default()
        }
    }

    /// Every mutable field of `record`, logs included.
    pub fn full(record: &JobRecord) -> Self {
        Self {
            logs: Some(record.logs.iter().cloned().collect()),
            save_path: record.save_path.clone(),
            ..Self::state_of(record)
        }
    }

    pub fn logs(record: &JobRecord) -> Self {
        Self {
            logs: Some(record.logs.iter().cloned().collect()),
            ..Default::default()
        }
    }

    pub fn progress(value: u8) -> Self {
        Self {
            progress: Some(value),
            ..Default::default()
        }
    }
}
