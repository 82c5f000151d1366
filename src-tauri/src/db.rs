use crate::error::{Error, Result};
use crate::types::InvoiceHistoryItem;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

pub const MIGRATION_DISMISSED_KEY: &str = "migration_dismissed";

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                invoices_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_processed_at ON history(processed_at);
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        // Migration 002: remember which Drive file an item was pulled from (run once when version < 2)
        let current_version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(1);
        if current_version < 2 {
            if let Err(e) = conn.execute("ALTER TABLE history ADD COLUMN drive_file_id TEXT", []) {
                if !e.to_string().contains("duplicate column") {
                    return Err(e.into());
                }
            }
            conn.execute("UPDATE schema_version SET version = 2", [])?;
        }

        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?)
    }

    /// All local items, newest first. Rows whose invoice JSON no longer parses are skipped.
    pub fn list_history(&self) -> Result<Vec<InvoiceHistoryItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_name, processed_at, invoices_json, drive_file_id FROM history ORDER BY processed_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, file_name, processed_at, invoices_json, drive_file_id) = row?;
            match serde_json::from_str(&invoices_json) {
                Ok(invoices) => out.push(InvoiceHistoryItem {
                    id,
                    file_name,
                    processed_at,
                    invoices,
                    drive_file_id,
                }),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable history row"),
            }
        }
        Ok(out)
    }

    pub fn get_history_item(&self, id: &str) -> Result<Option<InvoiceHistoryItem>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT file_name, processed_at, invoices_json, drive_file_id FROM history WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((file_name, processed_at, invoices_json, drive_file_id)) => {
                Ok(Some(InvoiceHistoryItem {
                    id: id.to_string(),
                    file_name,
                    processed_at,
                    invoices: serde_json::from_str(&invoices_json)?,
                    drive_file_id,
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace the item with the same id.
    pub fn save_history_item(&self, item: &InvoiceHistoryItem) -> Result<()> {
        let invoices_json = serde_json::to_string(&item.invoices)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO history (id, file_name, processed_at, invoices_json, drive_file_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               file_name = excluded.file_name,
               processed_at = excluded.processed_at,
               invoices_json = excluded.invoices_json,
               drive_file_id = excluded.drive_file_id",
            params![
                item.id,
                item.file_name,
                item.processed_at,
                invoices_json,
                item.drive_file_id
            ],
        )?;
        Ok(())
    }

    pub fn delete_history_item(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM history WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    pub fn clear_history(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM history", [])?;
        Ok(count as u64)
    }

    pub fn history_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT value FROM settings WHERE key = ?", params![key], |r| r.get(0))
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn is_migration_dismissed(&self) -> Result<bool> {
        Ok(self.get_setting(MIGRATION_DISMISSED_KEY)?.as_deref() == Some("true"))
    }

    pub fn dismiss_migration(&self) -> Result<()> {
        self.set_setting(MIGRATION_DISMISSED_KEY, "true")
    }
}
