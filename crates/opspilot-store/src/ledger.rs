//! Trigger ledger — persisted fire-exactly-once record for external events.
//!
//! Keyed by `(event_uid, occurrence)`. The check-then-insert is atomic via
//! SQLite's conflict clause, so replaying the poll loop after a restart never
//! re-fires an occurrence already marked.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;

use opspilot_core::error::{OpsPilotError, Result};

pub struct TriggerLedger {
    conn: Mutex<Connection>,
}

impl TriggerLedger {
    /// Open or create the ledger database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| OpsPilotError::Store(format!("Ledger open: {e}")))?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OpsPilotError::Store(format!("Ledger open: {e}")))?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trigger_ledger (
                event_uid TEXT NOT NULL,
                occurrence TEXT NOT NULL,
                fired_at TEXT NOT NULL,
                PRIMARY KEY (event_uid, occurrence)
            );",
        )
        .map_err(|e| OpsPilotError::Store(format!("Ledger migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OpsPilotError::Store(e.to_string()))
    }

    /// Atomic check-then-insert. Returns true if this call recorded the
    /// entry (first fire), false if the event/occurrence had already fired.
    pub fn mark_fired(&self, event_uid: &str, occurrence: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO trigger_ledger (event_uid, occurrence, fired_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![event_uid, occurrence, Utc::now().to_rfc3339()],
            )
            .map_err(|e| OpsPilotError::Store(format!("Ledger insert: {e}")))?;
        Ok(changed == 1)
    }

    /// Whether an event/occurrence has already fired.
    pub fn has_fired(&self, event_uid: &str, occurrence: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM trigger_ledger WHERE event_uid = ?1 AND occurrence = ?2",
                rusqlite::params![event_uid, occurrence],
                |r| r.get(0),
            )
            .map_err(|e| OpsPilotError::Store(format!("Ledger query: {e}")))?;
        Ok(n > 0)
    }

    /// Number of recorded entries.
    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM trigger_ledger", [], |r| r.get(0))
            .map_err(|e| OpsPilotError::Store(e.to_string()))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
