//! Schema versions of the history database.
//!
//! `schema_version` records every step that has been applied. Opening a
//! database applies the steps above its highest recorded version, each in
//! its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    change: Change,
}

enum Change {
    Sql(&'static str),
    /// Databases that already gained the column out of band keep it as is.
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

const HISTORY_TABLE: &str = "
CREATE TABLE IF NOT EXISTS history (
    id            TEXT PRIMARY KEY NOT NULL,
    source_path   TEXT NOT NULL,
    original_name TEXT NOT NULL,
    source_type   TEXT NOT NULL DEFAULT 'local',
    status        TEXT NOT NULL,
    progress      INTEGER NOT NULL DEFAULT 0,
    logs          TEXT NOT NULL DEFAULT '[]',
    output_dir    TEXT,
    save_path     TEXT,
    error         TEXT,
    title         TEXT,
    authors       TEXT NOT NULL DEFAULT '[]',
    abstract_text TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_status ON history (status);
CREATE INDEX IF NOT EXISTS idx_history_created_at ON history (created_at);
";

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "history table",
        change: Change::Sql(HISTORY_TABLE),
    },
    Step {
        version: 2,
        name: "history download id",
        change: Change::AddColumn {
            table: "history",
            column: "download_id",
            definition: "TEXT",
        },
    },
];

fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema of `conn` up to the newest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current = applied_version(conn)?;
    for step in STEPS.iter().filter(|s| s.version > current) {
        log::info!("Applying schema v{} ({})", step.version, step.name);
        apply(conn, step).map_err(|e| DatabaseError::Migration {
            version: step.version,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn apply(conn: &Connection, step: &Step) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    match step.change {
        Change::Sql(sql) => tx.execute_batch(sql)?,
        Change::AddColumn {
            table,
            column,
            definition,
        } => {
            if has_column(&tx, table, column)? {
                log::debug!("{}.{} already present", table, column);
            } else {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {};",
                    table, column, definition
                ))?;
            }
        }
    }
    tx.execute(
        "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
        rusqlite::params![step.version, step.name],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let found: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |r| r.get(0),
    )?;
    Ok(found > 0)
}
