//! All project and job state is stored in a SQLite database
//!
//! The connection sits behind a mutex. Every method locks it for a single statement (or a short
//! read-then-write on one record) and never across an `.await`, so monitors can share one store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

/// Connect to a SQLite database
pub mod open;
/// Status vocabularies stored as text columns
pub mod state;
pub mod project;
pub mod cromwell_job;
pub mod upload;
pub mod bulk;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store> {
        let conn = open::open_db(path)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Store> {
        let conn = open::open_in_memory()?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("Database connection lock poisoned"))
    }
}

/// Timestamps are stored as integer milliseconds so `ORDER BY updated` is exact
pub(crate) fn to_millis(time: &DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `?, ?, ?` for an IN clause
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
