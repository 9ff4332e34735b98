//! Ordered policy checks run before any reply is composed.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::policy::WeeklySchedule;
use crate::store::{Account, Client, ClientStore, MessageStore, RateWindowStore};

/// Why an inbound message gets no automated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    AutomationDisabled,
    QuotaExceeded,
    SenderBlocked,
    AfterHours,
    RateLimited,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutomationDisabled => "automation_disabled",
            Self::QuotaExceeded => "quota_exceeded",
            Self::SenderBlocked => "sender_blocked",
            Self::AfterHours => "after_hours",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Outcome of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Compose a reply (rules, then AI).
    Proceed,
    /// Stay silent.
    Suppress(SuppressReason),
    /// Closed right now: send this canned message instead of composing.
    OutOfOffice(String),
}

const DEFAULT_OOO_MESSAGE: &str =
    "Thanks for reaching out! We're currently closed and will get back to you \
     during business hours.";

pub struct PolicyEvaluator {
    messages: Arc<MessageStore>,
    clients: Arc<ClientStore>,
    rate_windows: Arc<RateWindowStore>,
}

impl PolicyEvaluator {
    pub fn new(
        messages: Arc<MessageStore>,
        clients: Arc<ClientStore>,
        rate_windows: Arc<RateWindowStore>,
    ) -> Self {
        Self {
            messages,
            clients,
            rate_windows,
        }
    }

    /// Run the checks in order: automation flags, daily quota, blocks,
    /// business hours, burst rate. The first failing check decides.
    ///
    /// The burst counter is incremented when the inbound message is
    /// persisted, so the current window count already includes it.
    pub fn evaluate(
        &self,
        account: &Account,
        client: &Client,
        now: DateTime<Utc>,
    ) -> Result<PolicyDecision, DatabaseError> {
        if !account.auto_reply_enabled || !account.ai_enabled {
            return Ok(PolicyDecision::Suppress(SuppressReason::AutomationDisabled));
        }

        let local_midnight = local_midnight_utc(account, now);
        let sent_today = self.messages.count_outbound_since(account.id, local_midnight)?;
        if sent_today >= account.daily_reply_limit {
            debug!(
                account_id = account.id,
                sent_today,
                limit = account.daily_reply_limit,
                "Daily reply quota reached"
            );
            return Ok(PolicyDecision::Suppress(SuppressReason::QuotaExceeded));
        }

        if self.clients.is_blocked_for(account.id, client)? {
            return Ok(PolicyDecision::Suppress(SuppressReason::SenderBlocked));
        }

        if let Some(decision) = self.check_hours(account, now) {
            return Ok(decision);
        }

        let burst = self
            .rate_windows
            .current(account.id, &client.phone_number, now)?;
        if burst > account.burst_limit {
            debug!(
                account_id = account.id,
                sender = %client.phone_number,
                burst,
                limit = account.burst_limit,
                "Sender over burst limit"
            );
            return Ok(PolicyDecision::Suppress(SuppressReason::RateLimited));
        }

        Ok(PolicyDecision::Proceed)
    }

    /// Returns a decision only when the account is outside business hours.
    fn check_hours(&self, account: &Account, now: DateTime<Utc>) -> Option<PolicyDecision> {
        let hours_json = account.business_hours.as_deref()?;
        let schedule = match WeeklySchedule::from_json(hours_json) {
            Ok(s) => s,
            Err(e) => {
                warn!(account_id = account.id, error = %e, "Unparseable business hours, treating as always open");
                return None;
            }
        };

        let local = now.with_timezone(&account_tz(account));
        if schedule.is_open_at(&local) {
            return None;
        }
        if account.after_hours_ai {
            return None;
        }
        if account.ooo_enabled {
            let message = account
                .ooo_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OOO_MESSAGE.to_string());
            return Some(PolicyDecision::OutOfOffice(message));
        }
        Some(PolicyDecision::Suppress(SuppressReason::AfterHours))
    }
}

fn account_tz(account: &Account) -> Tz {
    account.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!(account_id = account.id, timezone = %account.timezone, "Unknown timezone, falling back to UTC");
        Tz::UTC
    })
}

/// Midnight today in the account's local timezone, expressed in UTC.
/// This is where the daily quota resets.
fn local_midnight_utc(account: &Account, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = account_tz(account);
    let local = now.with_timezone(&tz);
    let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    match tz.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        // DST gap at midnight: fall back to the UTC day boundary.
        None => now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, MessageDirection, NewAccount, NewMessage, AccountStore};
    use chrono::TimeZone;

    struct Fixture {
        accounts: AccountStore,
        messages: Arc<MessageStore>,
        clients: Arc<ClientStore>,
        rate_windows: Arc<RateWindowStore>,
        evaluator: PolicyEvaluator,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let messages = Arc::new(MessageStore::new(db.clone()));
        let clients = Arc::new(ClientStore::new(db.clone()));
        let rate_windows = Arc::new(RateWindowStore::new(db.clone()));
        let evaluator =
            PolicyEvaluator::new(messages.clone(), clients.clone(), rate_windows.clone());
        Fixture {
            accounts: AccountStore::new(db),
            messages,
            clients,
            rate_windows,
            evaluator,
        }
    }

    fn account(f: &Fixture) -> Account {
        f.accounts
            .create(NewAccount {
                phone_number: "+15559990000".into(),
                display_name: "Desk".into(),
            })
            .unwrap()
    }

    fn client(f: &Fixture) -> Client {
        f.clients.record_contact("+15550001111").unwrap()
    }

    #[test]
    fn open_account_proceeds() {
        let f = fixture();
        let decision = f.evaluator.evaluate(&account(&f), &client(&f), Utc::now()).unwrap();
        assert_eq!(decision, PolicyDecision::Proceed);
    }

    #[test]
    fn disabled_automation_suppresses() {
        let f = fixture();
        let a = account(&f);
        f.accounts.set_automation(a.id, false, true).unwrap();
        let a = f.accounts.get(a.id).unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), Utc::now()).unwrap(),
            PolicyDecision::Suppress(SuppressReason::AutomationDisabled)
        );
    }

    #[test]
    fn quota_exhaustion_suppresses() {
        let f = fixture();
        let a = account(&f);
        f.accounts.set_limits(a.id, 1, 5).unwrap();
        let a = f.accounts.get(a.id).unwrap();
        f.messages
            .insert(NewMessage {
                account_id: a.id,
                direction: MessageDirection::Outbound,
                from_number: a.phone_number.clone(),
                to_number: "+15550001111".into(),
                body: "reply".into(),
                external_id: None,
                thread_id: "t".into(),
                reply_source: None,
                in_reply_to: None,
            })
            .unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), Utc::now()).unwrap(),
            PolicyDecision::Suppress(SuppressReason::QuotaExceeded)
        );
    }

    #[test]
    fn blocked_sender_suppresses() {
        let f = fixture();
        let a = account(&f);
        let c = client(&f);
        f.clients.block(c.id, Some("spam")).unwrap();
        let c = f.clients.find_by_number(&c.phone_number).unwrap().unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &c, Utc::now()).unwrap(),
            PolicyDecision::Suppress(SuppressReason::SenderBlocked)
        );
    }

    #[test]
    fn closed_hours_send_out_of_office() {
        let f = fixture();
        let a = account(&f);
        f.accounts
            .set_business_hours(
                a.id,
                "UTC",
                Some(r#"{"mon": {"open": "09:00:00", "close": "17:00:00"}}"#),
                false,
            )
            .unwrap();
        f.accounts.set_out_of_office(a.id, true, Some("We're closed.")).unwrap();
        let a = f.accounts.get(a.id).unwrap();
        // Monday 20:00 UTC, after close.
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), now).unwrap(),
            PolicyDecision::OutOfOffice("We're closed.".into())
        );
    }

    #[test]
    fn after_hours_ai_overrides_closed_hours() {
        let f = fixture();
        let a = account(&f);
        f.accounts
            .set_business_hours(
                a.id,
                "UTC",
                Some(r#"{"mon": {"open": "09:00:00", "close": "17:00:00"}}"#),
                true,
            )
            .unwrap();
        let a = f.accounts.get(a.id).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), now).unwrap(),
            PolicyDecision::Proceed
        );
    }

    #[test]
    fn closed_hours_without_ooo_suppress() {
        let f = fixture();
        let a = account(&f);
        f.accounts
            .set_business_hours(
                a.id,
                "UTC",
                Some(r#"{"mon": {"open": "09:00:00", "close": "17:00:00"}}"#),
                false,
            )
            .unwrap();
        let a = f.accounts.get(a.id).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), now).unwrap(),
            PolicyDecision::Suppress(SuppressReason::AfterHours)
        );
    }

    #[test]
    fn burst_limit_suppresses() {
        let f = fixture();
        let a = account(&f);
        f.accounts.set_limits(a.id, 100, 2).unwrap();
        let a = f.accounts.get(a.id).unwrap();
        let c = client(&f);
        let now = Utc::now();
        for _ in 0..3 {
            f.rate_windows.increment(a.id, &c.phone_number, now).unwrap();
        }
        assert_eq!(
            f.evaluator.evaluate(&a, &c, now).unwrap(),
            PolicyDecision::Suppress(SuppressReason::RateLimited)
        );
    }

    #[test]
    fn quota_resets_at_local_midnight() {
        let f = fixture();
        let a = account(&f);
        f.accounts.set_limits(a.id, 1, 5).unwrap();
        f.accounts.set_business_hours(a.id, "America/Chicago", None, false).unwrap();
        let a = f.accounts.get(a.id).unwrap();
        // No outbound messages today: quota available.
        assert_eq!(
            f.evaluator.evaluate(&a, &client(&f), Utc::now()).unwrap(),
            PolicyDecision::Proceed
        );
    }
}
