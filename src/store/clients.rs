//! Client records — the people texting in, with contact bookkeeping and
//! global or per-account blocks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::store::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub phone_number: String,
    /// Blocked everywhere, regardless of account.
    pub is_blocked: bool,
    pub is_flagged: bool,
    pub is_regular: bool,
    pub blocked_reason: Option<String>,
    pub first_contact: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
    pub total_messages: i64,
}

pub struct ClientStore {
    db: Arc<Database>,
}

impl ClientStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Find the client for a phone number, creating the record on first
    /// contact. Always bumps last_contact and the message counter.
    pub fn record_contact(&self, phone_number: &str) -> Result<Client, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO clients (phone_number, first_contact, last_contact, total_messages)
             VALUES (?1, ?2, ?2, 1)
             ON CONFLICT(phone_number) DO UPDATE SET
                 last_contact = excluded.last_contact,
                 total_messages = total_messages + 1",
            params![phone_number, now],
        )?;
        drop(conn);
        self.find_by_number(phone_number)?.ok_or(DatabaseError::NotFound {
            entity: "client",
            id: phone_number.to_string(),
        })
    }

    pub fn find_by_number(&self, phone_number: &str) -> Result<Option<Client>, DatabaseError> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {COLUMNS} FROM clients WHERE phone_number = ?1"),
            params![phone_number],
            row_to_client,
        );
        match result {
            Ok(client) => Ok(Some(client)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn block(&self, client_id: i64, reason: Option<&str>) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE clients SET is_blocked = 1, blocked_reason = ?1 WHERE id = ?2",
            params![reason, client_id],
        )?;
        Ok(())
    }

    pub fn unblock(&self, client_id: i64) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE clients SET is_blocked = 0, blocked_reason = NULL WHERE id = ?1",
            params![client_id],
        )?;
        Ok(())
    }

    /// Block a client for one account only.
    pub fn block_for_account(
        &self,
        account_id: i64,
        client_id: i64,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO blocked_clients (account_id, client_id, reason, blocked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id, client_id) DO UPDATE SET reason = excluded.reason",
            params![account_id, client_id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unblock_for_account(&self, account_id: i64, client_id: i64) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "DELETE FROM blocked_clients WHERE account_id = ?1 AND client_id = ?2",
            params![account_id, client_id],
        )?;
        Ok(())
    }

    /// Whether this client is blocked either globally or for the account.
    pub fn is_blocked_for(&self, account_id: i64, client: &Client) -> Result<bool, DatabaseError> {
        if client.is_blocked {
            return Ok(true);
        }
        let conn = self.db.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocked_clients WHERE account_id = ?1 AND client_id = ?2",
            params![account_id, client.id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn set_flagged(&self, client_id: i64, flagged: bool) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE clients SET is_flagged = ?1 WHERE id = ?2",
            params![flagged, client_id],
        )?;
        Ok(())
    }

    pub fn set_regular(&self, client_id: i64, regular: bool) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE clients SET is_regular = ?1 WHERE id = ?2",
            params![regular, client_id],
        )?;
        Ok(())
    }
}

const COLUMNS: &str = "id, phone_number, is_blocked, is_flagged, is_regular, blocked_reason, \
                       first_contact, last_contact, total_messages";

fn row_to_client(row: &Row<'_>) -> Result<Client, rusqlite::Error> {
    let first_contact: String = row.get(6)?;
    let last_contact: String = row.get(7)?;
    Ok(Client {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        is_blocked: row.get(2)?,
        is_flagged: row.get(3)?,
        is_regular: row.get(4)?,
        blocked_reason: row.get(5)?,
        first_contact: parse_ts(&first_contact, 6)?,
        last_contact: parse_ts(&last_contact, 7)?,
        total_messages: row.get(8)?,
    })
}

fn parse_ts(s: &str, index: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ClientStore {
        ClientStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn record_contact_creates_then_increments() {
        let store = store();
        let first = store.record_contact("+15550001111").unwrap();
        assert_eq!(first.total_messages, 1);
        let second = store.record_contact("+15550001111").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.total_messages, 2);
    }

    #[test]
    fn global_block_applies_to_every_account() {
        let store = store();
        let client = store.record_contact("+15550001111").unwrap();
        store.block(client.id, Some("abuse")).unwrap();
        let client = store.find_by_number("+15550001111").unwrap().unwrap();
        assert!(store.is_blocked_for(1, &client).unwrap());
        assert!(store.is_blocked_for(2, &client).unwrap());

        store.unblock(client.id).unwrap();
        let client = store.find_by_number("+15550001111").unwrap().unwrap();
        assert!(!store.is_blocked_for(1, &client).unwrap());
    }

    #[test]
    fn account_block_is_scoped() {
        let store = store();
        let client = store.record_contact("+15550001111").unwrap();
        store.block_for_account(1, client.id, None).unwrap();
        assert!(store.is_blocked_for(1, &client).unwrap());
        assert!(!store.is_blocked_for(2, &client).unwrap());

        store.unblock_for_account(1, client.id).unwrap();
        assert!(!store.is_blocked_for(1, &client).unwrap());
    }
}
