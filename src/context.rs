//! Application context — the stores and handles the HTTP layer needs.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::store::{
    AccountStore, ClientStore, Database, DeadLetterStore, MessageStore, RateWindowStore, RuleStore,
};
use crate::worker::TaskQueue;

pub struct AppContext {
    pub config: AppConfig,
    pub accounts: Arc<AccountStore>,
    pub clients: Arc<ClientStore>,
    pub messages: Arc<MessageStore>,
    pub rules: Arc<RuleStore>,
    pub rate_windows: Arc<RateWindowStore>,
    pub dead_letters: Arc<DeadLetterStore>,
    pub queue: TaskQueue,
}

impl AppContext {
    pub fn new(config: AppConfig, db: Arc<Database>, queue: TaskQueue) -> Self {
        Self {
            config,
            accounts: Arc::new(AccountStore::new(db.clone())),
            clients: Arc::new(ClientStore::new(db.clone())),
            messages: Arc::new(MessageStore::new(db.clone())),
            rules: Arc::new(RuleStore::new(db.clone())),
            rate_windows: Arc::new(RateWindowStore::new(db.clone())),
            dead_letters: Arc::new(DeadLetterStore::new(db)),
            queue,
        }
    }
}
