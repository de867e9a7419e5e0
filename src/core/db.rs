use crate::core::error::TaskmeshError;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;

pub fn db_connect(db_path: &Path) -> Result<Connection, TaskmeshError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction so the write lock is taken up
/// front and concurrent writers wait on `busy_timeout` instead of failing on upgrade.
pub fn with_immediate_tx<R, F>(conn: &Connection, f: F) -> Result<R, TaskmeshError>
where
    F: FnOnce(&Transaction<'_>) -> Result<R, TaskmeshError>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Brings a database up to `version`, applying `statements` when the recorded
/// version differs. Every statement must be idempotent (`IF NOT EXISTS`).
pub fn ensure_schema_version(
    conn: &Connection,
    version: &str,
    statements: &[&str],
) -> Result<(), TaskmeshError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if current.as_deref() == Some(version) {
        return Ok(());
    }

    with_immediate_tx(conn, |tx| {
        for stmt in statements {
            tx.execute(stmt, [])?;
        }
        tx.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [version],
        )?;
        Ok(())
    })
}
