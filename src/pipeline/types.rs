//! Core pipeline types — the normalized inbound message and processing
//! outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::policy::SuppressReason;
use crate::store::ReplySource;

/// An inbound SMS after webhook parsing, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSms {
    /// Carrier message SID.
    pub external_id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundSms {
    /// Stable thread identifier for this conversation. The same pair of
    /// numbers always lands in the same thread regardless of direction.
    pub fn thread_id(&self, account_id: i64) -> String {
        derive_thread_id(account_id, &self.from, &self.to)
    }
}

/// Deterministic thread id over (account, participant pair). Participants
/// are sorted so inbound and outbound legs hash identically.
pub fn derive_thread_id(account_id: i64, a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(account_id.to_le_bytes());
    hasher.update(lo.as_bytes());
    hasher.update(b":");
    hasher.update(hi.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// What processing an inbound message produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// An outbound reply was dispatched.
    Replied {
        message_id: String,
        source: ReplySource,
    },
    /// Policy decided to stay silent.
    Suppressed(SuppressReason),
    /// This inbound message was already answered; nothing re-sent.
    AlreadyProcessed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_is_direction_independent() {
        let inbound = derive_thread_id(1, "+15550001111", "+15559990000");
        let outbound = derive_thread_id(1, "+15559990000", "+15550001111");
        assert_eq!(inbound, outbound);
        assert_eq!(inbound.len(), 16);
    }

    #[test]
    fn thread_id_varies_by_account_and_pair() {
        let base = derive_thread_id(1, "+15550001111", "+15559990000");
        assert_ne!(base, derive_thread_id(2, "+15550001111", "+15559990000"));
        assert_ne!(base, derive_thread_id(1, "+15550002222", "+15559990000"));
    }
}
