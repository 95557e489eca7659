//! SQLite-backed store for transcripts, segments, entities, prospects and
//! learned state.
//!
//! The database lives at `~/.prism/prism.db` by default and is the only
//! durable state in the system. One `PrismDb` wraps one connection; callers
//! share it behind a mutex and never hold the lock across an await point.
//! Entity-specific methods live in the sibling modules as `impl PrismDb`
//! blocks.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection};

pub mod types;
pub use types::*;

mod deals;
mod insights;
mod objections;
mod people;
mod prospects;
mod queries;
mod transcripts;

pub struct PrismDb {
    conn: Connection,
}

/// The one connection, shared between the pipeline, learner and API.
pub type SharedDb = std::sync::Arc<parking_lot::Mutex<PrismDb>>;

impl PrismDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err. When already inside a transaction
    /// the closure joins it, so store helpers compose into one unit.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(val)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::error!("Store: rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Open a database at an explicit path, creating parent directories,
    /// enabling WAL and applying pending migrations.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Fresh, fully-migrated in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Config table
    // =========================================================================

    pub fn get_config(&self, key: &str) -> Result<Option<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Numeric config value, falling back when missing or unparseable.
    pub fn config_f64(&self, key: &str, fallback: f64) -> f64 {
        match self.get_config(key) {
            Ok(Some(value)) => value.trim().parse().unwrap_or_else(|_| {
                log::warn!("Store: config '{}' is not numeric ('{}')", key, value);
                fallback
            }),
            Ok(None) => fallback,
            Err(e) => {
                log::warn!("Store: failed to read config '{}': {}", key, e);
                fallback
            }
        }
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;
        Ok(())
    }
}

/// Current UTC time as RFC 3339. All timestamps are written from Rust so
/// lexical comparison matches chronological order.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Decode a JSON text column, treating NULL or empty as the type's default.
pub(crate) fn json_column<T: serde::de::DeserializeOwned + Default>(
    raw: Option<String>,
) -> rusqlite::Result<T> {
    match raw {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        }),
        _ => Ok(T::default()),
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::PrismDb;

    /// In-memory database with foreign keys enforced.
    pub fn test_db() -> PrismDb {
        PrismDb::open_in_memory().expect("Failed to open test database")
    }
}
