use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::models::DraftRow;

/// Local composer drafts, one row per (channel, thread) key.
///
/// Lives in its own file, separate from any backend data.
pub struct DraftDb {
    conn: Mutex<Connection>,
}

impl DraftDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        info!("Draft DB opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Draft DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn get(&self, key: &str) -> Result<Option<DraftRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT channel_id, thread_id, content, updated_at FROM drafts WHERE key = ?1",
                    [key],
                    |row| {
                        Ok(DraftRow {
                            channel_id: row.get(0)?,
                            thread_id: row.get(1)?,
                            content: row.get(2)?,
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn upsert(&self, key: &str, row: &DraftRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO drafts (key, channel_id, thread_id, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
                params![key, row.channel_id, row.thread_id, row.content, row.updated_at],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM drafts WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }

    /// Removes drafts last updated before `cutoff`. Returns how many went.
    pub fn delete_older_than(&self, cutoff: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM drafts WHERE updated_at < ?1", [cutoff])?;
            Ok(n)
        })
    }

    /// Keeps only the `capacity` most recently updated drafts.
    pub fn truncate_to(&self, capacity: usize) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM drafts WHERE key NOT IN (
                     SELECT key FROM drafts ORDER BY updated_at DESC, key ASC LIMIT ?1
                 )",
                [capacity as i64],
            )?;
            Ok(n)
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM drafts", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Draft DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE drafts (
                key         TEXT PRIMARY KEY,
                channel_id  TEXT NOT NULL,
                thread_id   TEXT,
                content     TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_drafts_updated ON drafts(updated_at);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    Ok(())
}
