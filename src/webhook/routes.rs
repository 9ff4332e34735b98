//! HTTP surface — carrier webhooks and health.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use secrecy::ExposeSecret;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::WebhookError;
use crate::pipeline::{self, InboundSms};
use crate::store::{Message, MessageDirection, MessageStatus, NewMessage};
use crate::webhook::{reply, signature};
use crate::worker::ProcessTask;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/webhooks/sms", post(inbound_sms))
        .route("/webhooks/status", post(delivery_status))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn healthz() -> &'static str {
    "ok"
}

// ── Inbound SMS ──

async fn inbound_sms(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match parse_form(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    if let Err(response) = check_signature(&ctx, &headers, "/webhooks/sms", &params) {
        return response;
    }

    let (sid, from, to, text) = match (
        param(&params, "MessageSid"),
        param(&params, "From"),
        param(&params, "To"),
        param(&params, "Body"),
    ) {
        (Some(sid), Some(from), Some(to), Some(text)) => (sid, from, to, text),
        _ => {
            warn!("Inbound webhook missing required fields");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let account = match ctx.accounts.find_by_number(to) {
        Ok(Some(account)) => account,
        Ok(None) => {
            // Acknowledge so the carrier stops retrying; nothing to do.
            warn!(to, "Inbound SMS for unmanaged number");
            return reply::empty();
        }
        Err(e) => return internal_error(e),
    };

    // Webhook replay: the SID is already stored. Skip the contact and
    // rate-window bookkeeping, which ran when the message first arrived,
    // and re-enqueue so a crashed run still gets its reply; the
    // processor's own replay guard prevents double-sends.
    match ctx.messages.get_by_external_id(sid) {
        Ok(Some(existing)) => {
            info!(sid, "Duplicate inbound webhook");
            let task = ProcessTask {
                message_id: existing.id,
                external_id: existing.external_id,
                thread_id: existing.thread_id,
            };
            if let Err(e) = ctx.queue.enqueue(task).await {
                error!(error = %e, "Task queue unavailable");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            return reply::empty();
        }
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }

    let client = match ctx.clients.record_contact(from) {
        Ok(c) => c,
        Err(e) => return internal_error(e),
    };

    let inbound = InboundSms {
        external_id: sid.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        body: text.to_string(),
        received_at: Utc::now(),
    };
    if let Err(e) = ctx
        .rate_windows
        .increment(account.id, &inbound.from, inbound.received_at)
    {
        return internal_error(e);
    }
    // Closed windows never get read again; drop them as traffic flows.
    if let Err(e) = ctx.rate_windows.prune(inbound.received_at) {
        warn!(error = %e, "Failed to prune rate windows");
    }

    let thread_id = inbound.thread_id(account.id);
    let message = match ctx.messages.insert(NewMessage {
        account_id: account.id,
        direction: MessageDirection::Inbound,
        from_number: inbound.from.clone(),
        to_number: inbound.to.clone(),
        body: inbound.body.clone(),
        external_id: Some(inbound.external_id.clone()),
        thread_id: thread_id.clone(),
        reply_source: None,
        in_reply_to: None,
    }) {
        Ok(m) => m,
        // Two deliveries of the same SID raced past the check above; the
        // loser picks up the row the winner inserted.
        Err(_) => match ctx.messages.get_by_external_id(sid) {
            Ok(Some(existing)) => {
                info!(sid, "Duplicate inbound webhook");
                existing
            }
            Ok(None) => {
                error!(sid, "Insert failed but SID not found");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Err(e) => return internal_error(e),
        },
    };

    if let Some(flag) = pipeline::screen(text) {
        warn!(sid, flag, "Inbound message flagged for review");
        if let Err(e) = ctx.messages.flag(&message.id, flag) {
            error!(error = %e, "Failed to flag message");
        }
        if let Err(e) = ctx.clients.set_flagged(client.id, true) {
            error!(error = %e, "Failed to flag client");
        }
    }

    let task = ProcessTask {
        message_id: message.id.clone(),
        external_id: message.external_id.clone(),
        thread_id,
    };
    if let Err(e) = ctx.queue.enqueue(task).await {
        error!(error = %e, "Task queue unavailable");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    info!(sid, message_id = %message.id, account_id = account.id, "Inbound SMS accepted");
    reply::empty()
}

// ── Delivery status ──

async fn delivery_status(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match parse_form(&body) {
        Ok(p) => p,
        Err(response) => return response,
    };
    if let Err(response) = check_signature(&ctx, &headers, "/webhooks/status", &params) {
        return response;
    }

    let (sid, carrier_status) = match (param(&params, "MessageSid"), param(&params, "MessageStatus"))
    {
        (Some(sid), Some(status)) => (sid, status),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };

    let next = match carrier_status {
        "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "failed" | "undelivered" => MessageStatus::Failed,
        // Intermediate carrier states carry no transition for us.
        other => {
            info!(sid, status = other, "Ignoring intermediate delivery status");
            return reply::empty();
        }
    };

    let message = match ctx.messages.get_by_external_id(sid) {
        Ok(Some(m)) => m,
        Ok(None) => {
            warn!(sid, "Delivery status for unknown message");
            return reply::empty();
        }
        Err(e) => return internal_error(e),
    };

    apply_status(&ctx, &message, next, &params);
    reply::empty()
}

fn apply_status(
    ctx: &AppContext,
    message: &Message,
    next: MessageStatus,
    params: &[(String, String)],
) {
    if next == MessageStatus::Failed {
        if let Some(code) = param(params, "ErrorCode") {
            if let Err(e) = ctx.messages.set_error(&message.id, &format!("carrier error {code}")) {
                error!(error = %e, "Failed to record carrier error");
            }
        }
    }
    match ctx.messages.transition_status(&message.id, next) {
        Ok(applied) => {
            info!(
                message_id = %message.id,
                status = applied.as_str(),
                "Delivery status reconciled"
            );
        }
        Err(e) => error!(error = %e, "Failed to apply delivery status"),
    }
}

// ── Helpers ──

fn parse_form(body: &str) -> Result<Vec<(String, String)>, Response> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(body).map_err(|e| {
        warn!(error = %e, "Unparseable webhook form body");
        StatusCode::BAD_REQUEST.into_response()
    })
}

fn check_signature(
    ctx: &AppContext,
    headers: &HeaderMap,
    path: &str,
    params: &[(String, String)],
) -> Result<(), Response> {
    let presented = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!(path, "Webhook missing signature header");
            StatusCode::FORBIDDEN.into_response()
        })?;

    let url = format!(
        "{}{}",
        ctx.config.public_base_url.trim_end_matches('/'),
        path
    );
    match signature::verify(
        ctx.config.webhook_secret.expose_secret(),
        &url,
        params,
        presented,
    ) {
        Ok(()) => Ok(()),
        Err(WebhookError::InvalidSignature) => {
            warn!(path, "Webhook signature rejected");
            Err(StatusCode::FORBIDDEN.into_response())
        }
        Err(e) => {
            warn!(path, error = %e, "Webhook rejected");
            Err(StatusCode::FORBIDDEN.into_response())
        }
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Webhook handler error");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
