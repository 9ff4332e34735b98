//! Auto-reply rule storage — keyword triggers with canned responses,
//! matched before any model call.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::store::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Trigger must equal the whole trimmed message.
    Exact,
    /// Trigger may appear anywhere in the message.
    Contains,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
        }
    }

    fn from_str(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            other => Err(DatabaseError::Serialization(format!(
                "unknown match mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoReplyRule {
    pub id: i64,
    pub account_id: i64,
    pub trigger: String,
    pub response: String,
    pub match_mode: MatchMode,
    pub case_sensitive: bool,
    pub priority: i64,
    pub is_active: bool,
    pub use_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewRule {
    pub account_id: i64,
    pub trigger: String,
    pub response: String,
    pub match_mode: MatchMode,
    pub case_sensitive: bool,
    pub priority: i64,
}

pub struct RuleStore {
    db: Arc<Database>,
}

impl RuleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, new: NewRule) -> Result<AutoReplyRule, DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO auto_reply_rules (account_id, trigger, response, match_mode,
                                           case_sensitive, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.account_id,
                new.trigger,
                new.response,
                new.match_mode.as_str(),
                new.case_sensitive,
                new.priority,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<AutoReplyRule, DatabaseError> {
        let conn = self.db.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM auto_reply_rules WHERE id = ?1"),
            params![id],
            row_to_rule,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: "auto_reply_rule",
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    /// Active rules for an account, highest priority first; ties broken
    /// by longer (more specific) trigger.
    pub fn active_for_account(&self, account_id: i64) -> Result<Vec<AutoReplyRule>, DatabaseError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM auto_reply_rules
             WHERE account_id = ?1 AND is_active = 1
             ORDER BY priority DESC, LENGTH(trigger) DESC, id ASC"
        ))?;
        let rules = stmt
            .query_map(params![account_id], row_to_rule)?
            .collect::<Result<_, _>>()?;
        Ok(rules)
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE auto_reply_rules SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(())
    }

    /// Bump the usage counter when a rule fires.
    pub fn record_use(&self, id: i64) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE auto_reply_rules SET use_count = use_count + 1, last_used = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute("DELETE FROM auto_reply_rules WHERE id = ?1", params![id])?;
        Ok(())
    }
}

const COLUMNS: &str =
    "id, account_id, trigger, response, match_mode, case_sensitive, priority, is_active, use_count";

fn row_to_rule(row: &Row<'_>) -> Result<AutoReplyRule, rusqlite::Error> {
    let match_mode: String = row.get(4)?;
    Ok(AutoReplyRule {
        id: row.get(0)?,
        account_id: row.get(1)?,
        trigger: row.get(2)?,
        response: row.get(3)?,
        match_mode: MatchMode::from_str(&match_mode).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            )
        })?,
        case_sensitive: row.get(5)?,
        priority: row.get(6)?,
        is_active: row.get(7)?,
        use_count: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn rule(trigger: &str, priority: i64) -> NewRule {
        NewRule {
            account_id: 1,
            trigger: trigger.into(),
            response: format!("response to {trigger}"),
            match_mode: MatchMode::Contains,
            case_sensitive: false,
            priority,
        }
    }

    #[test]
    fn active_rules_ordered_by_priority_then_trigger_length() {
        let store = store();
        store.create(rule("hours", 0)).unwrap();
        store.create(rule("opening hours", 0)).unwrap();
        store.create(rule("stop", 10)).unwrap();

        let rules = store.active_for_account(1).unwrap();
        let triggers: Vec<_> = rules.iter().map(|r| r.trigger.as_str()).collect();
        assert_eq!(triggers, vec!["stop", "opening hours", "hours"]);
    }

    #[test]
    fn inactive_rules_excluded() {
        let store = store();
        let r = store.create(rule("hours", 0)).unwrap();
        store.set_active(r.id, false).unwrap();
        assert!(store.active_for_account(1).unwrap().is_empty());
    }

    #[test]
    fn record_use_increments() {
        let store = store();
        let r = store.create(rule("hours", 0)).unwrap();
        store.record_use(r.id).unwrap();
        store.record_use(r.id).unwrap();
        assert_eq!(store.get(r.id).unwrap().use_count, 2);
    }
}
