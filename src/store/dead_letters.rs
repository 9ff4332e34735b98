//! Dead-letter storage for tasks that exhausted their retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::store::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub message_id: String,
    pub external_id: Option<String>,
    pub thread_id: String,
    pub attempts: i64,
    pub last_error: String,
    /// JSON snapshot of the task for operator inspection.
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub message_id: String,
    pub external_id: Option<String>,
    pub thread_id: String,
    pub attempts: i64,
    pub last_error: String,
    pub context: Option<String>,
}

pub struct DeadLetterStore {
    db: Arc<Database>,
}

impl DeadLetterStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, new: NewDeadLetter) -> Result<i64, DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO dead_letters (message_id, external_id, thread_id, attempts,
                                       last_error, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.message_id,
                new.external_id,
                new.thread_id,
                new.attempts,
                new.last_error,
                new.context,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent dead letters, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DeadLetter>, DatabaseError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, message_id, external_id, thread_id, attempts, last_error, context,
                    created_at
             FROM dead_letters ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let letters = stmt
            .query_map(params![limit as i64], row_to_dead_letter)?
            .collect::<Result<_, _>>()?;
        Ok(letters)
    }
}

fn row_to_dead_letter(row: &Row<'_>) -> Result<DeadLetter, rusqlite::Error> {
    let created_at: String = row.get(7)?;
    Ok(DeadLetter {
        id: row.get(0)?,
        message_id: row.get(1)?,
        external_id: row.get(2)?,
        thread_id: row.get(3)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        context: row.get(6)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_list() {
        let store = DeadLetterStore::new(Arc::new(Database::open_in_memory().unwrap()));
        store
            .insert(NewDeadLetter {
                message_id: "m1".into(),
                external_id: Some("SM1".into()),
                thread_id: "t1".into(),
                attempts: 3,
                last_error: "gateway timeout".into(),
                context: Some("{\"body\":\"hi\"}".into()),
            })
            .unwrap();

        let letters = store.recent(10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].last_error, "gateway timeout");
    }
}
