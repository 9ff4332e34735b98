//! Carrier gateway — sends SMS through a LaML-compatible REST API.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// A request to send one SMS.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub from: String,
    pub to: String,
    pub body: String,
    /// Where the carrier posts delivery-status callbacks.
    pub status_callback: Option<String>,
}

/// What the carrier accepted: its message SID and initial status.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub external_id: String,
    pub status: String,
}

/// Abstraction over the carrier so tests can swap in a mock.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, sms: &OutboundSms) -> Result<SendReceipt, GatewayError>;
}

// ── HTTP gateway ──

#[derive(Deserialize)]
struct MessageResponse {
    sid: String,
    status: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpSmsGateway {
    http: reqwest::Client,
    messages_url: String,
    project_id: String,
    auth_token: secrecy::SecretString,
    timeout: std::time::Duration,
}

impl HttpSmsGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            messages_url: format!(
                "{base}/api/laml/2010-04-01/Accounts/{}/Messages.json",
                config.project_id
            ),
            project_id: config.project_id.clone(),
            auth_token: config.auth_token.clone(),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, sms: &OutboundSms) -> Result<SendReceipt, GatewayError> {
        let mut form = vec![
            ("From", sms.from.as_str()),
            ("To", sms.to.as_str()),
            ("Body", sms.body.as_str()),
        ];
        if let Some(callback) = sms.status_callback.as_deref() {
            form.push(("StatusCallback", callback));
        }

        let response = self
            .http
            .post(&self.messages_url)
            .basic_auth(&self.project_id, Some(self.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let parsed: ErrorResponse = serde_json::from_str(&body).unwrap_or(ErrorResponse {
                code: None,
                message: None,
            });
            return Err(GatewayError::Rejected {
                code: parsed.code,
                message: parsed.message.unwrap_or(body),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        debug!(sid = %parsed.sid, status = %parsed.status, to = %sms.to, "Carrier accepted message");
        Ok(SendReceipt {
            external_id: parsed.sid,
            status: parsed.status,
        })
    }
}
