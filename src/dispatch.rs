//! Outbound dispatch — persists the reply row, hands it to the carrier,
//! and records the result. A retry after a failed send reuses the
//! existing row instead of inserting a duplicate.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::PipelineError;
use crate::gateway::{OutboundSms, SmsGateway};
use crate::store::{
    Account, Message, MessageDirection, MessageStatus, MessageStore, NewMessage, ReplySource,
};

pub struct OutboundDispatcher {
    messages: Arc<MessageStore>,
    gateway: Arc<dyn SmsGateway>,
    /// Absolute URL the carrier posts delivery-status callbacks to.
    status_callback_url: Option<String>,
}

impl OutboundDispatcher {
    pub fn new(
        messages: Arc<MessageStore>,
        gateway: Arc<dyn SmsGateway>,
        status_callback_url: Option<String>,
    ) -> Self {
        Self {
            messages,
            gateway,
            status_callback_url,
        }
    }

    /// Send `body` as the reply to `inbound`. When `reuse` carries a prior
    /// failed or stuck reply row, that row is reset and reused so the
    /// thread never accumulates duplicate replies.
    pub async fn dispatch(
        &self,
        account: &Account,
        inbound: &Message,
        body: String,
        source: ReplySource,
        reuse: Option<&Message>,
    ) -> Result<Message, PipelineError> {
        let row = match reuse {
            Some(existing) => {
                self.messages.reset_for_retry(&existing.id)?;
                self.messages.set_body(&existing.id, &body)?;
                self.messages.get(&existing.id)?
            }
            None => self.messages.insert(NewMessage {
                account_id: account.id,
                direction: MessageDirection::Outbound,
                from_number: account.phone_number.clone(),
                to_number: inbound.from_number.clone(),
                body: body.clone(),
                external_id: None,
                thread_id: inbound.thread_id.clone(),
                reply_source: Some(source),
                in_reply_to: inbound.external_id.clone(),
            })?,
        };

        let sms = OutboundSms {
            from: account.phone_number.clone(),
            to: inbound.from_number.clone(),
            body,
            status_callback: self.status_callback_url.clone(),
        };

        match self.gateway.send(&sms).await {
            Ok(receipt) => {
                self.messages.set_external_id(&row.id, &receipt.external_id)?;
                self.messages.transition_status(&row.id, MessageStatus::Sent)?;
                info!(
                    message_id = %row.id,
                    external_id = %receipt.external_id,
                    source = source.as_str(),
                    "Reply sent"
                );
                Ok(self.messages.get(&row.id)?)
            }
            Err(e) => {
                error!(message_id = %row.id, error = %e, "Carrier send failed");
                self.messages.set_error(&row.id, &e.to_string())?;
                self.messages.transition_status(&row.id, MessageStatus::Failed)?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::SendReceipt;
    use crate::store::{AccountStore, Database, NewAccount};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FlakyGateway {
        failures_left: Mutex<u32>,
        sends: Mutex<Vec<OutboundSms>>,
    }

    impl FlakyGateway {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                sends: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SmsGateway for FlakyGateway {
        async fn send(&self, sms: &OutboundSms) -> Result<SendReceipt, GatewayError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(GatewayError::Http {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.sends.lock().unwrap().push(sms.clone());
            Ok(SendReceipt {
                external_id: format!("SMout{}", self.sends.lock().unwrap().len()),
                status: "queued".into(),
            })
        }
    }

    struct Fixture {
        messages: Arc<MessageStore>,
        account: Account,
        inbound: Message,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let messages = Arc::new(MessageStore::new(db.clone()));
        let account = AccountStore::new(db)
            .create(NewAccount {
                phone_number: "+15559990000".into(),
                display_name: "Desk".into(),
            })
            .unwrap();
        let inbound = messages
            .insert(NewMessage {
                account_id: account.id,
                direction: MessageDirection::Inbound,
                from_number: "+15550001111".into(),
                to_number: account.phone_number.clone(),
                body: "hi".into(),
                external_id: Some("SMin1".into()),
                thread_id: "t1".into(),
                reply_source: None,
                in_reply_to: None,
            })
            .unwrap();
        Fixture {
            messages,
            account,
            inbound,
        }
    }

    #[tokio::test]
    async fn successful_dispatch_records_sid_and_status() {
        let f = fixture();
        let gateway = Arc::new(FlakyGateway::new(0));
        let dispatcher = OutboundDispatcher::new(f.messages.clone(), gateway, None);

        let sent = dispatcher
            .dispatch(&f.account, &f.inbound, "hello".into(), ReplySource::Ai, None)
            .await
            .unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.external_id.as_deref(), Some("SMout1"));
        assert_eq!(sent.in_reply_to.as_deref(), Some("SMin1"));
    }

    #[tokio::test]
    async fn failed_send_marks_row_failed() {
        let f = fixture();
        let gateway = Arc::new(FlakyGateway::new(10));
        let dispatcher = OutboundDispatcher::new(f.messages.clone(), gateway, None);

        let err = dispatcher
            .dispatch(&f.account, &f.inbound, "hello".into(), ReplySource::Ai, None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let reply = f.messages.find_reply_to("SMin1").unwrap().unwrap();
        assert_eq!(reply.status, MessageStatus::Failed);
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn retry_reuses_failed_row() {
        let f = fixture();
        let gateway = Arc::new(FlakyGateway::new(1));
        let dispatcher = OutboundDispatcher::new(f.messages.clone(), gateway, None);

        dispatcher
            .dispatch(&f.account, &f.inbound, "hello".into(), ReplySource::Ai, None)
            .await
            .unwrap_err();
        let failed = f.messages.find_reply_to("SMin1").unwrap().unwrap();

        let sent = dispatcher
            .dispatch(
                &f.account,
                &f.inbound,
                "hello again".into(),
                ReplySource::Ai,
                Some(&failed),
            )
            .await
            .unwrap();
        assert_eq!(sent.id, failed.id);
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.body, "hello again");
        assert_eq!(sent.retry_count, 1);

        // Still exactly one outbound row for the thread.
        let history = f.messages.thread_history("t1", "none", 10).unwrap();
        assert_eq!(
            history
                .iter()
                .filter(|m| m.direction == MessageDirection::Outbound)
                .count(),
            1
        );
    }
}
