//! Error types for Textline.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Webhook ingestion errors.
///
/// All of these are permanent: the carrier request is acknowledged (to stop
/// carrier-side retries) but no task is queued.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("No account owns number {0}")]
    UnknownAccount(String),
}

/// Inference service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Inference request failed: {0}")]
    RequestFailed(String),

    #[error("Inference request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether another attempt could succeed.
    ///
    /// Timeouts, transport failures, and 5xx responses are transient;
    /// 4xx responses indicate a bad request shape and are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Carrier gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gateway rejected message (code {code:?}): {message}")]
    Rejected { code: Option<u32>, message: String },

    #[error("Gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether another attempt could succeed.
    ///
    /// A `Rejected` is the carrier refusing the message itself (invalid
    /// destination, blocked content) and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Rejected { .. } | Self::InvalidResponse(_) => false,
        }
    }
}

/// Pipeline processing errors for a single inbound message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Inbound message {0} no longer exists")]
    MessageGone(String),
}

impl PipelineError {
    /// Whether the orchestrator should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_retryable(),
            // Local SQLite failures and vanished rows won't heal on retry.
            Self::Database(_) | Self::MessageGone(_) => false,
        }
    }
}

/// Task orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Task exhausted {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Task queue closed")]
    QueueClosed,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_retryability_by_class() {
        assert!(LlmError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(LlmError::RequestFailed("connection refused".into()).is_retryable());
        assert!(
            LlmError::Http {
                status: 503,
                body: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::Http {
                status: 400,
                body: "bad prompt".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::InvalidResponse("not json".into()).is_retryable());
    }

    #[test]
    fn gateway_rejection_is_permanent() {
        let rejected = GatewayError::Rejected {
            code: Some(21211),
            message: "invalid 'To' number".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(GatewayError::Transport("reset by peer".into()).is_retryable());
        assert!(
            GatewayError::Http {
                status: 502,
                body: "bad gateway".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn pipeline_error_delegates_to_gateway() {
        let transient: PipelineError = GatewayError::Timeout(Duration::from_secs(5)).into();
        assert!(transient.is_retryable());

        let permanent: PipelineError = GatewayError::Rejected {
            code: None,
            message: "blocked".into(),
        }
        .into();
        assert!(!permanent.is_retryable());
    }
}
