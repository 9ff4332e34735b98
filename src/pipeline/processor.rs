//! The message processor — runs one inbound message through policy,
//! rules, generation, and dispatch.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ai::ReplyGenerator;
use crate::dispatch::OutboundDispatcher;
use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::context::build_turns;
use crate::pipeline::rules::match_rule;
use crate::pipeline::types::ProcessOutcome;
use crate::policy::{PolicyDecision, PolicyEvaluator};
use crate::store::{
    AccountStore, ClientStore, Message, MessageStatus, MessageStore, ReplySource, RuleStore,
};

/// How many prior messages feed the model prompt.
const HISTORY_LIMIT: usize = 10;

/// Everything the processor needs, wired explicitly.
pub struct ProcessorDeps {
    pub accounts: Arc<AccountStore>,
    pub clients: Arc<ClientStore>,
    pub messages: Arc<MessageStore>,
    pub rules: Arc<RuleStore>,
    pub policy: Arc<PolicyEvaluator>,
    pub generator: Arc<ReplyGenerator>,
    pub dispatcher: Arc<OutboundDispatcher>,
}

pub struct MessageProcessor {
    deps: ProcessorDeps,
}

impl MessageProcessor {
    pub fn new(deps: ProcessorDeps) -> Self {
        Self { deps }
    }

    /// Process a persisted inbound message end to end. Safe to call more
    /// than once for the same message: an already-answered inbound is a
    /// no-op, and a retry after a failed send reuses the failed reply row.
    pub async fn process(&self, message_id: &str) -> Result<ProcessOutcome, PipelineError> {
        let inbound = match self.deps.messages.get(message_id) {
            Ok(m) => m,
            Err(DatabaseError::NotFound { .. }) => {
                return Err(PipelineError::MessageGone(message_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        // Replay guard: if this inbound already has a live reply, stop.
        // A failed or stuck reply row is kept for reuse so the retry does
        // not duplicate it.
        let mut reuse: Option<Message> = None;
        if let Some(sid) = inbound.external_id.as_deref() {
            if let Some(existing) = self.deps.messages.find_reply_to(sid)? {
                match existing.status {
                    MessageStatus::Sent | MessageStatus::Delivered => {
                        info!(message_id, reply_id = %existing.id, "Inbound already answered");
                        return Ok(ProcessOutcome::AlreadyProcessed);
                    }
                    _ => reuse = Some(existing),
                }
            }
        }

        // Inbound rows stay at `received`; the status ladder tracks the
        // outbound reply, and inbox bookkeeping lives in `is_read`.
        let account = self.deps.accounts.get(inbound.account_id)?;
        let client = match self.deps.clients.find_by_number(&inbound.from_number)? {
            Some(c) => c,
            // Contact bookkeeping normally happens at webhook time.
            None => self.deps.clients.record_contact(&inbound.from_number)?,
        };

        let decision = self
            .deps
            .policy
            .evaluate(&account, &client, inbound.created_at)?;

        let (body, source) = match decision {
            PolicyDecision::Suppress(reason) => {
                info!(message_id, reason = reason.as_str(), "Reply suppressed");
                return Ok(ProcessOutcome::Suppressed(reason));
            }
            PolicyDecision::OutOfOffice(message) => (message, ReplySource::OutOfOffice),
            PolicyDecision::Proceed => self.compose(&account, &inbound).await?,
        };

        let sent = self
            .deps
            .dispatcher
            .dispatch(&account, &inbound, body, source, reuse.as_ref())
            .await?;

        Ok(ProcessOutcome::Replied {
            message_id: sent.id,
            source,
        })
    }

    /// Rules first; the model only when no rule matches.
    async fn compose(
        &self,
        account: &crate::store::Account,
        inbound: &Message,
    ) -> Result<(String, ReplySource), PipelineError> {
        let rules = self.deps.rules.active_for_account(account.id)?;
        if let Some(rule) = match_rule(&rules, &inbound.body) {
            if let Err(e) = self.deps.rules.record_use(rule.id) {
                warn!(rule_id = rule.id, error = %e, "Failed to record rule use");
            }
            return Ok((rule.response.clone(), ReplySource::Rule));
        }

        let history =
            self.deps
                .messages
                .thread_history(&inbound.thread_id, &inbound.id, HISTORY_LIMIT)?;
        let turns = build_turns(&history);
        Ok(self
            .deps
            .generator
            .generate(account, &turns, &inbound.body)
            .await)
    }
}
