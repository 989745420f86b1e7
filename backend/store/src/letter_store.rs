/// SQLite-backed letter archive.
///
/// Uses `rusqlite` to persist one row per scanned letter in a `letters`
/// table. The table is append-only: ids come from SQLite's rowid
/// autoincrement and are never reused, and nothing in the service
/// updates or deletes a row. Schema creation runs on every open and
/// leaves existing data untouched.
use std::path::Path;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use mailscan_core::{LetterRecord, NewLetter, ScanError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS letters (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_date         TEXT NOT NULL,
    send_date         TEXT,
    sender_name       TEXT,
    sender_address    TEXT,
    recipient_name    TEXT,
    recipient_address TEXT
);";

pub struct LetterStore {
    conn: Mutex<Connection>,
}

impl LetterStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        conn.execute_batch(&format!("PRAGMA journal_mode=WAL;\n{SCHEMA}"))
            .map_err(storage_err)?;
        info!("LetterStore opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert a letter and return the id SQLite assigned to it.
    pub async fn insert(&self, letter: &NewLetter) -> Result<i64, ScanError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO letters (scan_date, send_date, sender_name, sender_address, recipient_name, recipient_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                letter.scan_date,
                letter.fields.send_date,
                letter.fields.sender_name,
                letter.fields.sender_address,
                letter.fields.recipient_name,
                letter.fields.recipient_address,
            ],
        )
        .map_err(storage_err)?;
        let id = conn.last_insert_rowid();
        debug!(id, "Inserted letter");
        Ok(id)
    }

    /// Every letter, newest scan first. scan_date has second
    /// granularity, so same-second ties fall back to id descending
    /// (insertion order reversed).
    pub async fn list_all(&self) -> Result<Vec<LetterRecord>, ScanError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, scan_date, send_date, sender_name, sender_address, recipient_name, recipient_address
                 FROM letters ORDER BY scan_date DESC, id DESC",
            )
            .map_err(storage_err)?;

        let letters = stmt
            .query_map([], |row| {
                Ok(LetterRecord {
                    id: row.get(0)?,
                    scan_date: row.get(1)?,
                    send_date: row.get(2)?,
                    sender_name: row.get(3)?,
                    sender_address: row.get(4)?,
                    recipient_name: row.get(5)?,
                    recipient_address: row.get(6)?,
                })
            })
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(letters)
    }

    /// Total number of letters in the archive.
    pub async fn count(&self) -> Result<i64, ScanError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT COUNT(*) FROM letters", [], |row| row.get(0))
            .map_err(storage_err)
    }
}

fn storage_err(e: rusqlite::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}
