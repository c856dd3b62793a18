//! History persisted in the SQLite `history` table.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{HistoryEntry, HistoryPatch, HistoryStore};
use crate::db::history_repo::{self, HistoryRow};
use crate::db::{Database, DatabaseError};
use crate::metadata::DocumentMetadata;
use crate::worker::job::{JobStatus, SourceType};

fn parse_status(s: &str, id: &str) -> Option<JobStatus> {
    let status = JobStatus::parse(s);
    if status.is_none() {
        log::warn!(
            "Unknown history status '{}' for job {}, defaulting to failed",
            s,
            id
        );
    }
    status
}

/// A failed entry always carries an error, even when the row lost it.
fn failure_text(error: Option<String>, fallback: impl FnOnce() -> String) -> String {
    match error {
        Some(e) if !e.trim().is_empty() => e,
        _ => fallback(),
    }
}

fn parse_source_type(s: &str, id: &str) -> SourceType {
    SourceType::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown source type '{}' for job {}, defaulting to local",
            s,
            id
        );
        SourceType::Local
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn path_to_string(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}

fn entry_to_row(entry: &HistoryEntry) -> Result<HistoryRow, DatabaseError> {
    let logs = serde_json::to_string(&entry.logs)
        .map_err(|source| DatabaseError::Json { column: "logs", source })?;
    let authors = serde_json::to_string(&entry.metadata.authors)
        .map_err(|source| DatabaseError::Json { column: "authors", source })?;

    Ok(HistoryRow {
        id: entry.id.clone(),
        source_path: path_to_string(&entry.source_path),
        original_name: entry.original_name.clone(),
        source_type: entry.source_type.as_str().to_string(),
        download_id: entry.download_id.clone(),
        status: entry.status.as_str().to_string(),
        progress: i64::from(entry.progress),
        logs,
        output_dir: entry.output_dir.as_deref().map(path_to_string),
        save_path: entry.save_path.as_deref().map(path_to_string),
        error: entry.error.clone(),
        title: entry.metadata.title.clone(),
        authors,
        abstract_text: entry.metadata.abstract_text.clone(),
        created_at: format_timestamp(entry.created_at),
        updated_at: format_timestamp(entry.updated_at),
    })
}

fn row_to_entry(row: HistoryRow) -> Result<HistoryEntry, DatabaseError> {
    let logs: Vec<String> = serde_json::from_str(&row.logs)
        .map_err(|source| DatabaseError::Json { column: "logs", source })?;
    let authors: Vec<String> = serde_json::from_str(&row.authors)
        .map_err(|source| DatabaseError::Json { column: "authors", source })?;

    let (status, error) = match parse_status(&row.status, &row.id) {
        Some(JobStatus::Failed) => (
            JobStatus::Failed,
            Some(failure_text(row.error, || "Translation failed".to_string())),
        ),
        Some(status) => (status, row.error),
        None => (
            JobStatus::Failed,
            Some(failure_text(row.error, || {
                format!("Unknown history status '{}'", row.status)
            })),
        ),
    };

    Ok(HistoryEntry {
        status,
        source_type: parse_source_type(&row.source_type, &row.id),
        progress: row.progress.clamp(0, 100) as u8,
        source_path: PathBuf::from(row.source_path),
        original_name: row.original_name,
        download_id: row.download_id,
        logs,
        output_dir: row.output_dir.map(PathBuf::from),
        save_path: row.save_path.map(PathBuf::from),
        error,
        metadata: DocumentMetadata {
            title: row.title,
            authors,
            abstract_text: row.abstract_text,
        },
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        id: row.id,
    })
}

/// [`HistoryStore`] backed by the rusqlite [`Database`].
#[derive(Clone)]
pub struct SqliteHistoryStore {
    db: Database,
}

impl SqliteHistoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn list(&self) -> Result<Vec<HistoryEntry>, DatabaseError> {
        history_repo::list(&self.db)?
            .into_iter()
            .map(row_to_entry)
            .collect()
    }

    fn get(&self, id: &str) -> Result<Option<HistoryEntry>, DatabaseError> {
        history_repo::find_by_id(&self.db, id)?
            .map(row_to_entry)
            .transpose()
    }

    fn append(&self, entry: HistoryEntry) -> Result<(), DatabaseError> {
        if history_repo::find_by_id(&self.db, &entry.id)?.is_some() {
            return Err(DatabaseError::Duplicate { id: entry.id });
        }
        history_repo::insert(&self.db, &entry_to_row(&entry)?)
    }

    fn upsert(&self, id: &str, patch: &HistoryPatch) -> Result<bool, DatabaseError> {
        let Some(row) = history_repo::find_by_id(&self.db, id)? else {
            return Ok(false);
        };
        let mut entry = row_to_entry(row)?;
        entry.apply(patch);
        history_repo::update(&self.db, &entry_to_row(&entry)?)
    }

    fn remove(&self, id: &str) -> Result<bool, DatabaseError> {
        history_repo::delete(&self.db, id)
    }
}
