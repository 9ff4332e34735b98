//! Inbound message pipeline — normalization, rule matching, context
//! assembly, content screening, and end-to-end processing.

pub mod context;
mod flagger;
mod processor;
mod rules;
mod types;

pub use flagger::screen;
pub use processor::{MessageProcessor, ProcessorDeps};
pub use rules::match_rule;
pub use types::{InboundSms, ProcessOutcome, derive_thread_id};
