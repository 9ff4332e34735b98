//! Account records — the provisioned phone numbers the assistant answers
//! for, plus their per-account automation settings.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::store::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub phone_number: String,
    pub display_name: String,
    pub auto_reply_enabled: bool,
    pub ai_enabled: bool,
    /// When closed per business hours, still let the model answer instead
    /// of sending the out-of-office message.
    pub after_hours_ai: bool,
    pub daily_reply_limit: i64,
    /// Max inbound messages per sender per 5-minute window.
    pub burst_limit: i64,
    /// IANA timezone name, e.g. "America/Chicago".
    pub timezone: String,
    /// Weekly schedule as JSON, or None for always-open.
    pub business_hours: Option<String>,
    pub ooo_enabled: bool,
    pub ooo_message: Option<String>,
    pub ai_model: Option<String>,
    pub ai_temperature: f64,
    pub ai_max_tokens: i64,
    pub ai_persona: Option<String>,
    pub ai_instructions: Option<String>,
}

/// Settings for creating an account. Everything beyond the phone number
/// has a sensible default.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone_number: String,
    pub display_name: String,
}

pub struct AccountStore {
    db: Arc<Database>,
}

impl AccountStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, new: NewAccount) -> Result<Account, DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO accounts (phone_number, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![new.phone_number, new.display_name, Utc::now().to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<Account, DatabaseError> {
        let conn = self.db.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM accounts WHERE id = ?1"),
            params![id],
            row_to_account,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: "account",
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    /// Look up the account owning a provisioned number. Returns None for
    /// numbers we do not manage.
    pub fn find_by_number(&self, phone_number: &str) -> Result<Option<Account>, DatabaseError> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {COLUMNS} FROM accounts WHERE phone_number = ?1"),
            params![phone_number],
            row_to_account,
        );
        match result {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_automation(
        &self,
        id: i64,
        auto_reply_enabled: bool,
        ai_enabled: bool,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE accounts SET auto_reply_enabled = ?1, ai_enabled = ?2 WHERE id = ?3",
            params![auto_reply_enabled, ai_enabled, id],
        )?;
        Ok(())
    }

    pub fn set_business_hours(
        &self,
        id: i64,
        timezone: &str,
        hours_json: Option<&str>,
        after_hours_ai: bool,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE accounts SET timezone = ?1, business_hours = ?2, after_hours_ai = ?3
             WHERE id = ?4",
            params![timezone, hours_json, after_hours_ai, id],
        )?;
        Ok(())
    }

    pub fn set_out_of_office(
        &self,
        id: i64,
        enabled: bool,
        message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE accounts SET ooo_enabled = ?1, ooo_message = ?2 WHERE id = ?3",
            params![enabled, message, id],
        )?;
        Ok(())
    }

    pub fn set_limits(
        &self,
        id: i64,
        daily_reply_limit: i64,
        burst_limit: i64,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE accounts SET daily_reply_limit = ?1, burst_limit = ?2 WHERE id = ?3",
            params![daily_reply_limit, burst_limit, id],
        )?;
        Ok(())
    }

    pub fn set_persona(
        &self,
        id: i64,
        persona: Option<&str>,
        instructions: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE accounts SET ai_persona = ?1, ai_instructions = ?2 WHERE id = ?3",
            params![persona, instructions, id],
        )?;
        Ok(())
    }
}

const COLUMNS: &str = "id, phone_number, display_name, auto_reply_enabled, ai_enabled, \
                       after_hours_ai, daily_reply_limit, burst_limit, timezone, \
                       business_hours, ooo_enabled, ooo_message, ai_model, ai_temperature, \
                       ai_max_tokens, ai_persona, ai_instructions";

fn row_to_account(row: &Row<'_>) -> Result<Account, rusqlite::Error> {
    Ok(Account {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        display_name: row.get(2)?,
        auto_reply_enabled: row.get(3)?,
        ai_enabled: row.get(4)?,
        after_hours_ai: row.get(5)?,
        daily_reply_limit: row.get(6)?,
        burst_limit: row.get(7)?,
        timezone: row.get(8)?,
        business_hours: row.get(9)?,
        ooo_enabled: row.get(10)?,
        ooo_message: row.get(11)?,
        ai_model: row.get(12)?,
        ai_temperature: row.get(13)?,
        ai_max_tokens: row.get(14)?,
        ai_persona: row.get(15)?,
        ai_instructions: row.get(16)?,
    })
}
