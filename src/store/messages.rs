//! Message persistence — inbound and outbound SMS rows, threads, and
//! delivery-status transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::store::Database;

// ── Types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    fn from_str(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(DatabaseError::Serialization(format!(
                "unknown message direction: {other}"
            ))),
        }
    }
}

/// Lifecycle of a message. Transitions are forward-only: a status may
/// only advance along received → processing → sent → delivered, with
/// `failed` reachable from any non-terminal state. Delivered and Failed
/// are terminal. Inbound rows rest at `received`; the rungs past that
/// track outbound replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Processing,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "received" => Ok(Self::Received),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Serialization(format!(
                "unknown message status: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Processing => 1,
            Self::Sent => 2,
            Self::Delivered => 3,
            Self::Failed => 4,
        }
    }

    /// Whether the transition `self -> next` is allowed. Re-applying the
    /// current status is not a transition (callers treat it as a no-op).
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() || next == *self {
            return false;
        }
        next.rank() > self.rank()
    }
}

/// Where an outbound reply's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Rule,
    Ai,
    Fallback,
    OutOfOffice,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Ai => "ai",
            Self::Fallback => "fallback",
            Self::OutOfOffice => "out_of_office",
        }
    }

    fn from_str(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "rule" => Ok(Self::Rule),
            "ai" => Ok(Self::Ai),
            "fallback" => Ok(Self::Fallback),
            "out_of_office" => Ok(Self::OutOfOffice),
            other => Err(DatabaseError::Serialization(format!(
                "unknown reply source: {other}"
            ))),
        }
    }

    /// Whether the reply body was produced by the inference model.
    pub fn is_ai_generated(&self) -> bool {
        matches!(self, Self::Ai)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub account_id: i64,
    pub direction: MessageDirection,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub status: MessageStatus,
    /// Carrier-assigned message SID, unique when present.
    pub external_id: Option<String>,
    pub thread_id: String,
    pub reply_source: Option<ReplySource>,
    /// For outbound rows: the external_id of the inbound message this replies to.
    pub in_reply_to: Option<String>,
    pub retry_count: i64,
    pub error: Option<String>,
    pub is_read: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Parameters for inserting a new message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: i64,
    pub direction: MessageDirection,
    pub from_number: String,
    pub to_number: String,
    pub body: String,
    pub external_id: Option<String>,
    pub thread_id: String,
    pub reply_source: Option<ReplySource>,
    pub in_reply_to: Option<String>,
}

// ── Store ──

pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new message. Returns the stored row.
    pub fn insert(&self, new: NewMessage) -> Result<Message, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let status = match new.direction {
            MessageDirection::Inbound => MessageStatus::Received,
            MessageDirection::Outbound => MessageStatus::Processing,
        };

        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO messages (id, account_id, direction, from_number, to_number, body,
                                   status, external_id, thread_id, reply_source, in_reply_to,
                                   created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                new.account_id,
                new.direction.as_str(),
                new.from_number,
                new.to_number,
                new.body,
                status.as_str(),
                new.external_id,
                new.thread_id,
                new.reply_source.map(|s| s.as_str()),
                new.in_reply_to,
                now.to_rfc3339(),
            ],
        )?;

        drop(conn);
        self.get(&id)
    }

    pub fn get(&self, id: &str) -> Result<Message, DatabaseError> {
        let conn = self.db.conn();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: "message",
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Result<Option<Message>, DatabaseError> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE external_id = ?1"),
            params![external_id],
            row_to_message,
        );
        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Find the outbound reply to a given inbound message, if one exists.
    pub fn find_reply_to(&self, inbound_external_id: &str) -> Result<Option<Message>, DatabaseError> {
        let conn = self.db.conn();
        let result = conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE direction = 'outbound' AND in_reply_to = ?1
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![inbound_external_id],
            row_to_message,
        );
        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The most recent messages in a thread, oldest first, excluding the
    /// message with `exclude_id`.
    pub fn thread_history(
        &self,
        thread_id: &str,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE thread_id = ?1 AND id != ?2
             ORDER BY created_at DESC LIMIT ?3"
        ))?;
        let mut messages: Vec<Message> = stmt
            .query_map(params![thread_id, exclude_id, limit as i64], row_to_message)?
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Count outbound replies for an account created at or after `since`.
    /// Used for the daily quota check.
    pub fn count_outbound_since(
        &self,
        account_id: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.db.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE account_id = ?1 AND direction = 'outbound' AND created_at >= ?2",
            params![account_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Apply a status transition if it is allowed. Returns the resulting
    /// status: unchanged when the transition is a replay or would move
    /// backwards from a terminal state.
    pub fn transition_status(
        &self,
        id: &str,
        next: MessageStatus,
    ) -> Result<MessageStatus, DatabaseError> {
        let current = self.get(id)?;
        if !current.status.can_transition_to(next) {
            if current.status != next {
                debug!(
                    message_id = %id,
                    from = current.status.as_str(),
                    to = next.as_str(),
                    "Ignoring disallowed status transition"
                );
            }
            return Ok(current.status);
        }

        let now = Utc::now().to_rfc3339();
        let timestamp_col = match next {
            MessageStatus::Sent => Some("sent_at"),
            MessageStatus::Delivered => Some("delivered_at"),
            MessageStatus::Failed => Some("failed_at"),
            _ => None,
        };

        let conn = self.db.conn();
        match timestamp_col {
            Some(col) => {
                conn.execute(
                    &format!("UPDATE messages SET status = ?1, {col} = ?2 WHERE id = ?3"),
                    params![next.as_str(), now, id],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE messages SET status = ?1 WHERE id = ?2",
                    params![next.as_str(), id],
                )?;
            }
        }
        Ok(next)
    }

    /// Record the carrier SID assigned to an outbound message at send time.
    pub fn set_external_id(&self, id: &str, external_id: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE messages SET external_id = ?1 WHERE id = ?2",
            params![external_id, id],
        )?;
        Ok(())
    }

    pub fn set_body(&self, id: &str, body: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE messages SET body = ?1 WHERE id = ?2",
            params![body, id],
        )?;
        Ok(())
    }

    pub fn set_error(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE messages SET error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }

    pub fn increment_retry_count(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE messages SET retry_count = retry_count + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Reset a failed outbound row so a retry can reuse it instead of
    /// inserting a duplicate reply.
    pub fn reset_for_retry(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        let updated = conn.execute(
            "UPDATE messages
             SET status = 'processing', retry_count = retry_count + 1,
                 error = NULL, failed_at = NULL
             WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            warn!(message_id = %id, "reset_for_retry matched no rows");
        }
        Ok(())
    }

    pub fn mark_read(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute("UPDATE messages SET is_read = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn flag(&self, id: &str, reason: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE messages SET is_flagged = 1, flag_reason = ?1 WHERE id = ?2",
            params![reason, id],
        )?;
        Ok(())
    }
}

// ── Row mapping ──

const COLUMNS: &str = "id, account_id, direction, from_number, to_number, body, status, \
                       external_id, thread_id, reply_source, in_reply_to, retry_count, error, \
                       is_read, is_flagged, flag_reason, created_at, sent_at, delivered_at, \
                       failed_at";

fn row_to_message(row: &Row<'_>) -> Result<Message, rusqlite::Error> {
    let direction: String = row.get(2)?;
    let status: String = row.get(6)?;
    let reply_source: Option<String> = row.get(9)?;
    let created_at: String = row.get(16)?;
    let sent_at: Option<String> = row.get(17)?;
    let delivered_at: Option<String> = row.get(18)?;
    let failed_at: Option<String> = row.get(19)?;

    Ok(Message {
        id: row.get(0)?,
        account_id: row.get(1)?,
        direction: MessageDirection::from_str(&direction).map_err(invalid_column(2))?,
        from_number: row.get(3)?,
        to_number: row.get(4)?,
        body: row.get(5)?,
        status: MessageStatus::from_str(&status).map_err(invalid_column(6))?,
        external_id: row.get(7)?,
        thread_id: row.get(8)?,
        reply_source: reply_source
            .as_deref()
            .map(ReplySource::from_str)
            .transpose()
            .map_err(invalid_column(9))?,
        in_reply_to: row.get(10)?,
        retry_count: row.get(11)?,
        error: row.get(12)?,
        is_read: row.get(13)?,
        is_flagged: row.get(14)?,
        flag_reason: row.get(15)?,
        created_at: parse_timestamp(&created_at).map_err(invalid_column(16))?,
        sent_at: sent_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(invalid_column(17))?,
        delivered_at: delivered_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(invalid_column(18))?,
        failed_at: failed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(invalid_column(19))?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

fn invalid_column(index: usize) -> impl FnOnce(DatabaseError) -> rusqlite::Error {
    move |e| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn inbound(external_id: &str) -> NewMessage {
        NewMessage {
            account_id: 1,
            direction: MessageDirection::Inbound,
            from_number: "+15550001111".into(),
            to_number: "+15559990000".into(),
            body: "hello".into(),
            external_id: Some(external_id.into()),
            thread_id: "thread-a".into(),
            reply_source: None,
            in_reply_to: None,
        }
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let store = store();
        let msg = store.insert(inbound("SM123")).unwrap();
        assert_eq!(msg.status, MessageStatus::Received);
        assert_eq!(msg.direction, MessageDirection::Inbound);

        let fetched = store.get_by_external_id("SM123").unwrap().unwrap();
        assert_eq!(fetched.id, msg.id);
        assert_eq!(fetched.body, "hello");
    }

    #[test]
    fn duplicate_external_id_rejected() {
        let store = store();
        store.insert(inbound("SM123")).unwrap();
        assert!(store.insert(inbound("SM123")).is_err());
    }

    #[test]
    fn status_moves_forward_only() {
        let store = store();
        let msg = store.insert(inbound("SM1")).unwrap();

        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Processing).unwrap(),
            MessageStatus::Processing
        );
        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Sent).unwrap(),
            MessageStatus::Sent
        );
        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Delivered).unwrap(),
            MessageStatus::Delivered
        );
        // Terminal: a late "sent" callback does not regress the status.
        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Sent).unwrap(),
            MessageStatus::Delivered
        );
        // Replay of the terminal status is a no-op.
        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Delivered).unwrap(),
            MessageStatus::Delivered
        );
        assert!(store.get(&msg.id).unwrap().delivered_at.is_some());
    }

    #[test]
    fn failed_is_terminal() {
        let store = store();
        let msg = store.insert(inbound("SM2")).unwrap();
        store.transition_status(&msg.id, MessageStatus::Failed).unwrap();
        assert_eq!(
            store.transition_status(&msg.id, MessageStatus::Delivered).unwrap(),
            MessageStatus::Failed
        );
        assert!(store.get(&msg.id).unwrap().failed_at.is_some());
    }

    #[test]
    fn thread_history_is_chronological_and_excludes_current() {
        let store = store();
        let m1 = store.insert(inbound("SM10")).unwrap();
        let m2 = store.insert(inbound("SM11")).unwrap();
        let m3 = store.insert(inbound("SM12")).unwrap();

        let history = store.thread_history("thread-a", &m3.id, 10).unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![m1.id.as_str(), m2.id.as_str()]);
    }

    #[test]
    fn find_reply_to_links_outbound_to_inbound() {
        let store = store();
        store.insert(inbound("SM20")).unwrap();
        let reply = store
            .insert(NewMessage {
                account_id: 1,
                direction: MessageDirection::Outbound,
                from_number: "+15559990000".into(),
                to_number: "+15550001111".into(),
                body: "hi back".into(),
                external_id: None,
                thread_id: "thread-a".into(),
                reply_source: Some(ReplySource::Ai),
                in_reply_to: Some("SM20".into()),
            })
            .unwrap();

        let found = store.find_reply_to("SM20").unwrap().unwrap();
        assert_eq!(found.id, reply.id);
        assert!(found.reply_source.unwrap().is_ai_generated());
        assert!(store.find_reply_to("SM99").unwrap().is_none());
    }

    #[test]
    fn count_outbound_since_ignores_inbound() {
        let store = store();
        store.insert(inbound("SM30")).unwrap();
        store
            .insert(NewMessage {
                account_id: 1,
                direction: MessageDirection::Outbound,
                from_number: "+15559990000".into(),
                to_number: "+15550001111".into(),
                body: "reply".into(),
                external_id: None,
                thread_id: "thread-a".into(),
                reply_source: Some(ReplySource::Rule),
                in_reply_to: Some("SM30".into()),
            })
            .unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.count_outbound_since(1, since).unwrap(), 1);
    }

    #[test]
    fn mark_read_and_flag_bookkeeping() {
        let store = store();
        let msg = store.insert(inbound("SM50")).unwrap();
        assert!(!msg.is_read);

        store.mark_read(&msg.id).unwrap();
        store.flag(&msg.id, "urgent").unwrap();

        let updated = store.get(&msg.id).unwrap();
        assert!(updated.is_read);
        assert!(updated.is_flagged);
        assert_eq!(updated.flag_reason.as_deref(), Some("urgent"));
    }

    #[test]
    fn reset_for_retry_reopens_failed_row() {
        let store = store();
        let msg = store
            .insert(NewMessage {
                account_id: 1,
                direction: MessageDirection::Outbound,
                from_number: "+15559990000".into(),
                to_number: "+15550001111".into(),
                body: "reply".into(),
                external_id: None,
                thread_id: "thread-a".into(),
                reply_source: Some(ReplySource::Ai),
                in_reply_to: Some("SM40".into()),
            })
            .unwrap();
        store.transition_status(&msg.id, MessageStatus::Failed).unwrap();
        store.set_error(&msg.id, "gateway 503").unwrap();

        store.reset_for_retry(&msg.id).unwrap();
        let reopened = store.get(&msg.id).unwrap();
        assert_eq!(reopened.status, MessageStatus::Processing);
        assert_eq!(reopened.retry_count, 1);
        assert!(reopened.error.is_none());
    }
}
