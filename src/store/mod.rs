//! Persistence layer — SQLite-backed stores for accounts, clients,
//! messages, rules, rate windows, and dead letters.

mod accounts;
mod clients;
mod db;
mod dead_letters;
mod messages;
mod rate_windows;
mod rules;

pub use accounts::{Account, AccountStore, NewAccount};
pub use clients::{Client, ClientStore};
pub use db::Database;
pub use dead_letters::{DeadLetter, DeadLetterStore, NewDeadLetter};
pub use messages::{
    Message, MessageDirection, MessageStatus, MessageStore, NewMessage, ReplySource,
};
pub use rate_windows::{RateWindowStore, WINDOW_SECS};
pub use rules::{AutoReplyRule, MatchMode, NewRule, RuleStore};
