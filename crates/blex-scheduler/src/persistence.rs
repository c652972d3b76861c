//! SQLite-backed notification store.
//!
//! The `key` column holds the dedup fingerprint and is UNIQUE, so inserting
//! a duplicate is a no-op at the database level rather than a
//! check-then-insert race.

use blex_core::error::{BlexError, Result};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub username: String,
    pub url: String,
    pub content: String,
    /// Dedup fingerprint.
    pub key: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification persistence.
pub struct NotificationDb {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> BlexError + '_ {
    move |e| BlexError::Database(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamps so lexical order matches time order.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

/// The instant `days` before `now`. Errors instead of overflowing when the
/// window reaches past the representable calendar.
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| BlexError::Config(format!("Retention of {days} days is out of range")))
}

impl NotificationDb {
    /// Open or create the notification database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BlexError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                url TEXT NOT NULL,
                content TEXT NOT NULL,
                key TEXT NOT NULL UNIQUE,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_username
                ON notifications (username, id);
            ",
            )
            .map_err(db_err("Migration"))
    }

    /// Insert unless a row with the same fingerprint exists.
    /// Returns the new row, or `None` for a duplicate.
    pub fn insert_if_absent(
        &self,
        username: &str,
        url: &str,
        content: &str,
        key: &str,
    ) -> Result<Option<Notification>> {
        self.insert_at(username, url, content, key, Utc::now())
    }

    pub(crate) fn insert_at(
        &self,
        username: &str,
        url: &str,
        content: &str,
        key: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO notifications
                     (username, url, content, key, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![username, url, content, key, timestamp(created_at)],
            )
            .map_err(db_err("Insert notification"))?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(Notification {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            url: url.to_string(),
            content: content.to_string(),
            key: key.to_string(),
            is_read: false,
            created_at,
        }))
    }

    /// Notifications for a user, newest first.
    pub fn list_for_user(&self, username: &str, limit: Option<usize>) -> Result<Vec<Notification>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, username, url, content, key, is_read, created_at
                 FROM notifications WHERE username = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(db_err("Prepare list"))?;

        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![username, limit], |row| {
                let created_at: String = row.get(6)?;
                Ok(Notification {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    url: row.get(2)?,
                    content: row.get(3)?,
                    key: row.get(4)?,
                    is_read: row.get::<_, i32>(5)? != 0,
                    created_at: parse_timestamp(6, &created_at)?,
                })
            })
            .map_err(db_err("List notifications"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Read notification row"))
    }

    pub fn unread_count(&self, username: &str) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE username = ?1 AND is_read = 0",
                params![username],
                |row| row.get(0),
            )
            .map_err(db_err("Count unread"))?;
        Ok(count as u64)
    }

    /// Mark one notification read. Scoped to the owner so a user cannot
    /// touch someone else's row. Returns whether a row changed.
    pub fn mark_read(&self, id: i64, username: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE notifications SET is_read = 1
                 WHERE id = ?1 AND username = ?2 AND is_read = 0",
                params![id, username],
            )
            .map_err(db_err("Mark read"))?;
        Ok(changed > 0)
    }

    pub fn mark_all_read(&self, username: &str) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE username = ?1 AND is_read = 0",
                params![username],
            )
            .map_err(db_err("Mark all read"))
    }

    /// Delete read notifications created before `cutoff`.
    pub fn prune_read_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM notifications WHERE is_read = 1 AND created_at < ?1",
                params![timestamp(cutoff)],
            )
            .map_err(db_err("Prune notifications"))?;
        tracing::info!("Pruned {removed} read notifications older than {cutoff}");
        Ok(removed)
    }

    /// Delete read notifications older than `days` days.
    pub fn prune_read_older_than(&self, days: u32) -> Result<usize> {
        self.prune_read_before(retention_cutoff(Utc::now(), days)?)
    }
}
