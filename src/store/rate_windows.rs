//! Per-sender burst counters over fixed 5-minute windows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::DatabaseError;
use crate::store::Database;

/// Fixed window width in seconds.
pub const WINDOW_SECS: i64 = 300;

pub struct RateWindowStore {
    db: Arc<Database>,
}

impl RateWindowStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Increment the counter for (account, sender) in the window covering
    /// `at`, returning the new count. Atomic under the connection mutex.
    pub fn increment(
        &self,
        account_id: i64,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let window_start = window_start(at);
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO rate_windows (account_id, sender, window_start, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(account_id, sender, window_start) DO UPDATE SET count = count + 1",
            params![account_id, sender, window_start],
        )?;
        let count = conn.query_row(
            "SELECT count FROM rate_windows
             WHERE account_id = ?1 AND sender = ?2 AND window_start = ?3",
            params![account_id, sender, window_start],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Current count for the window covering `at`, without incrementing.
    pub fn current(
        &self,
        account_id: i64,
        sender: &str,
        at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let window_start = window_start(at);
        let conn = self.db.conn();
        let result = conn.query_row(
            "SELECT count FROM rate_windows
             WHERE account_id = ?1 AND sender = ?2 AND window_start = ?3",
            params![account_id, sender, window_start],
            |row| row.get(0),
        );
        match result {
            Ok(count) => Ok(count),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop windows that ended before `before`. Called opportunistically.
    pub fn prune(&self, before: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let cutoff = window_start(before) - WINDOW_SECS;
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM rate_windows WHERE window_start < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

fn window_start(at: DateTime<Utc>) -> i64 {
    let ts = at.timestamp();
    ts - ts.rem_euclid(WINDOW_SECS)
}
