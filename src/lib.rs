//! Textline — SMS conversational assistant pipeline.

pub mod ai;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod policy;
pub mod store;
pub mod webhook;
pub mod worker;

pub use error::{Error, Result};
