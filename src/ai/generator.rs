//! Reply generation — prompt assembly, bounded retries against the
//! inference service, and SMS sanitization. Generation never fails
//! outward: exhausted retries produce the fallback reply.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ai::{InferenceClient, InferenceRequest};
use crate::config::InferenceConfig;
use crate::pipeline::context::Turn;
use crate::store::{Account, ReplySource};

pub const FALLBACK_REPLY: &str =
    "Thanks for your message! I'll get back to you as soon as I can.";

const MAX_SMS_LEN: usize = 1500;

const DEFAULT_PERSONA: &str =
    "You are a friendly, professional assistant answering text messages on behalf \
     of a small business.";

pub struct ReplyGenerator {
    client: Arc<dyn InferenceClient>,
    config: InferenceConfig,
}

impl ReplyGenerator {
    pub fn new(client: Arc<dyn InferenceClient>, config: InferenceConfig) -> Self {
        Self { client, config }
    }

    /// Produce a reply to `body` with the prior `turns` as context.
    /// Returns the sanitized text and whether it came from the model or
    /// the fallback.
    pub async fn generate(
        &self,
        account: &Account,
        turns: &[Turn],
        body: &str,
    ) -> (String, ReplySource) {
        let request = InferenceRequest {
            model: account
                .ai_model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            prompt: build_prompt(account, turns, body),
            temperature: account.ai_temperature,
            max_tokens: account.ai_max_tokens,
            stop: vec!["Client:".into(), "\nClient".into()],
        };

        for attempt in 1..=self.config.max_attempts {
            let started = std::time::Instant::now();
            match self.client.generate(&request).await {
                Ok(response) => {
                    let text = sanitize_for_sms(&response.text);
                    if text.is_empty() {
                        warn!(attempt, "Inference returned empty text");
                    } else {
                        info!(
                            attempt,
                            latency_ms = started.elapsed().as_millis() as u64,
                            chars = text.len(),
                            prompt_tokens = ?response.prompt_tokens,
                            completion_tokens = ?response.completion_tokens,
                            "Generated reply"
                        );
                        return (text, ReplySource::Ai);
                    }
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, error = %e, "Inference attempt failed, retrying");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                    continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Inference failed, using fallback reply");
                    return (FALLBACK_REPLY.to_string(), ReplySource::Fallback);
                }
            }
        }

        (FALLBACK_REPLY.to_string(), ReplySource::Fallback)
    }
}

fn build_prompt(account: &Account, turns: &[Turn], body: &str) -> String {
    let persona = account.ai_persona.as_deref().unwrap_or(DEFAULT_PERSONA);
    let mut prompt = String::new();
    prompt.push_str(persona);
    prompt.push('\n');
    if !account.display_name.is_empty() {
        prompt.push_str(&format!("The business is called {}.\n", account.display_name));
    }
    if let Some(instructions) = account.ai_instructions.as_deref() {
        prompt.push_str(instructions);
        prompt.push('\n');
    }
    prompt.push_str(
        "Keep replies short and natural, suitable for SMS. Never mention being an AI.\n\n",
    );
    if !turns.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&crate::pipeline::context::render_transcript(turns));
        prompt.push('\n');
    }
    prompt.push_str(&format!("Client: {body}\nYou:"));
    prompt
}

/// Clean model output for SMS delivery: strip speaker labels the model
/// sometimes echoes, drop control characters, collapse whitespace runs,
/// and truncate to a safe length.
pub fn sanitize_for_sms(raw: &str) -> String {
    let mut text = raw.trim();
    for label in ["Assistant:", "AI:", "You:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut last_was_space = false;
    for c in cleaned.chars() {
        if c == ' ' || c == '\t' {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(c);
            last_was_space = false;
        }
    }
    let collapsed = collapsed.trim().to_string();

    if collapsed.chars().count() > MAX_SMS_LEN {
        let truncated: String = collapsed.chars().take(MAX_SMS_LEN).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}
