//! History repository: CRUD operations for the `history` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw history row. JSON-encoded columns (`logs`, `authors`) are kept as
/// text here and decoded by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: String,
    pub source_path: String,
    pub original_name: String,
    pub source_type: String,
    pub download_id: Option<String>,
    pub status: String,
    pub progress: i64,
    pub logs: String,
    pub output_dir: Option<String>,
    pub save_path: Option<String>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub authors: String,
    pub abstract_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl HistoryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_path: row.get("source_path")?,
            original_name: row.get("original_name")?,
            source_type: row.get("source_type")?,
            download_id: row.get("download_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            logs: row.get("logs")?,
            output_dir: row.get("output_dir")?,
            save_path: row.get("save_path")?,
            error: row.get("error")?,
            title: row.get("title")?,
            authors: row.get("authors")?,
            abstract_text: row.get("abstract_text")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new history row.
pub fn insert(db: &Database, row: &HistoryRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO history (id, source_path, original_name, source_type, download_id,
             status, progress, logs, output_dir, save_path, error, title, authors,
             abstract_text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                row.id,
                row.source_path,
                row.original_name,
                row.source_type,
                row.download_id,
                row.status,
                row.progress,
                row.logs,
                row.output_dir,
                row.save_path,
                row.error,
                row.title,
                row.authors,
                row.abstract_text,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites every mutable column of an existing row. Returns whether a
/// row with that id existed.
pub fn update(db: &Database, row: &HistoryRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE history SET source_path=?2, original_name=?3, source_type=?4,
             download_id=?5, status=?6, progress=?7, logs=?8, output_dir=?9, save_path=?10,
             error=?11, title=?12, authors=?13, abstract_text=?14, updated_at=?15
             WHERE id=?1",
            params![
                row.id,
                row.source_path,
                row.original_name,
                row.source_type,
                row.download_id,
                row.status,
                row.progress,
                row.logs,
                row.output_dir,
                row.save_path,
                row.error,
                row.title,
                row.authors,
                row.abstract_text,
                row.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a row by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<HistoryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM history WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], HistoryRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns every row, newest first.
pub fn list(db: &Database) -> Result<Vec<HistoryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM history ORDER BY created_at DESC, id")?;
        let rows = stmt
            .query_map([], HistoryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a row. Returns whether it existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_row(id: &str, created_at: &str) -> HistoryRow {
        HistoryRow {
            id: id.to_string(),
            source_path: "/tmp/paper.pdf".to_string(),
            original_name: "paper.pdf".to_string(),
            source_type: "local".to_string(),
            download_id: None,
            status: "running".to_string(),
            progress: 0,
            logs: "[]".to_string(),
            output_dir: None,
            save_path: None,
            error: None,
            title: Some("paper".to_string()),
            authors: "[]".to_string(),
            abstract_text: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let row = sample_row("h1", "2026-01-01T00:00:00Z");
        insert(&db, &row).unwrap();

        let found = find_by_id(&db, "h1").unwrap().unwrap();
        assert_eq!(found, row);
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_update_existing_and_missing() {
        let db = test_db();
        let mut row = sample_row("h1", "2026-01-01T00:00:00Z");
        insert(&db, &row).unwrap();

        row.status = "failed".to_string();
        row.error = Some("Translation process exited with code 1".to_string());
        row.progress = 100;
        assert!(update(&db, &row).unwrap());

        let found = find_by_id(&db, "h1").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(found.progress, 100);

        let ghost = sample_row("ghost", "2026-01-01T00:00:00Z");
        assert!(!update(&db, &ghost).unwrap());
    }

    #[test]
    fn test_list_newest_first() {
        let db = test_db();
        insert(&db, &sample_row("old", "2026-01-01T00:00:00Z")).unwrap();
        insert(&db, &sample_row("new", "2026-03-01T00:00:00Z")).unwrap();

        let ids: Vec<String> = list(&db).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        insert(&db, &sample_row("h1", "2026-01-01T00:00:00Z")).unwrap();
        assert!(delete(&db, "h1").unwrap());
        assert!(!delete(&db, "h1").unwrap());
        assert!(list(&db).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let db = test_db();
        let row = sample_row("h1", "2026-01-01T00:00:00Z");
        insert(&db, &row).unwrap();
        assert!(matches!(insert(&db, &row), Err(DatabaseError::Sqlite(_))));
    }
}
