//! Service configuration, read once from the environment at startup.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default number of pipeline workers.
const DEFAULT_WORKERS: usize = 4;

/// Default overall per-task deadline in seconds.
const DEFAULT_TASK_DEADLINE_SECS: u64 = 90;

/// Default inference call timeout in seconds.
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;

/// Full service configuration.
///
/// Built eagerly in `main` via [`AppConfig::from_env`]; missing required
/// values fail startup instead of surfacing mid-request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind address for the webhook server, e.g. "0.0.0.0:8080".
    pub bind_addr: String,
    /// Public base URL the carrier posts webhooks to (used in signature
    /// validation), e.g. "https://sms.example.com".
    pub public_base_url: String,
    /// Shared secret the carrier signs webhook payloads with.
    pub webhook_secret: SecretString,
    /// SQLite database path.
    pub db_path: String,
    /// Carrier gateway settings.
    pub gateway: GatewayConfig,
    /// Inference service settings.
    pub inference: InferenceConfig,
    /// Number of background pipeline workers.
    pub workers: usize,
    /// Wall-clock deadline for one pipeline task (policy + AI + send).
    pub task_deadline: Duration,
    /// Maximum orchestrator attempts per task (transient failures only).
    pub max_task_attempts: u32,
}

/// Carrier gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the carrier REST API, e.g. "https://space.signalwire.com".
    pub base_url: String,
    /// Project / account identifier.
    pub project_id: String,
    /// API auth token.
    pub auth_token: SecretString,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Inference service connection settings.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the inference server, e.g. "http://llm:11434".
    pub base_url: String,
    /// Default model identifier (overridable per account).
    pub model: String,
    /// Per-call timeout. Must stay below the overall task deadline.
    pub timeout: Duration,
    /// Attempts per generation before the fallback reply is used.
    pub max_attempts: u32,
    /// Delay between generation attempts.
    pub retry_delay: Duration,
}

impl AppConfig {
    /// Read configuration from `TEXTLINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env_or("TEXTLINE_BIND_ADDR", "0.0.0.0:8080");
        let public_base_url = require_env("TEXTLINE_PUBLIC_URL")?;
        let webhook_secret = SecretString::from(require_env("TEXTLINE_WEBHOOK_SECRET")?);
        let db_path = env_or("TEXTLINE_DB_PATH", "./data/textline.db");

        let gateway = GatewayConfig {
            base_url: require_env("TEXTLINE_CARRIER_URL")?,
            project_id: require_env("TEXTLINE_CARRIER_PROJECT")?,
            auth_token: SecretString::from(require_env("TEXTLINE_CARRIER_TOKEN")?),
            timeout: Duration::from_secs(parse_env("TEXTLINE_CARRIER_TIMEOUT_SECS", 15)?),
        };

        let inference = InferenceConfig {
            base_url: env_or("TEXTLINE_INFERENCE_URL", "http://127.0.0.1:11434"),
            model: env_or("TEXTLINE_INFERENCE_MODEL", "dolphin-mistral:7b"),
            timeout: Duration::from_secs(parse_env(
                "TEXTLINE_INFERENCE_TIMEOUT_SECS",
                DEFAULT_INFERENCE_TIMEOUT_SECS,
            )?),
            max_attempts: parse_env("TEXTLINE_INFERENCE_ATTEMPTS", 3)?,
            retry_delay: Duration::from_millis(parse_env("TEXTLINE_INFERENCE_RETRY_MS", 500)?),
        };

        let task_deadline =
            Duration::from_secs(parse_env("TEXTLINE_TASK_DEADLINE_SECS", DEFAULT_TASK_DEADLINE_SECS)?);

        if inference.timeout >= task_deadline {
            return Err(ConfigError::InvalidValue {
                key: "TEXTLINE_INFERENCE_TIMEOUT_SECS".into(),
                message: format!(
                    "inference timeout ({:?}) must be shorter than the task deadline ({:?})",
                    inference.timeout, task_deadline
                ),
            });
        }

        Ok(Self {
            bind_addr,
            public_base_url,
            webhook_secret,
            db_path,
            gateway,
            inference,
            workers: parse_env("TEXTLINE_WORKERS", DEFAULT_WORKERS)?,
            task_deadline,
            max_task_attempts: parse_env("TEXTLINE_TASK_ATTEMPTS", 3)?,
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{v}'"),
        }),
        _ => Ok(default),
    }
}
