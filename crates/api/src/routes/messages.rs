//! Message enqueue and history routes.
//!
//! Enqueue endpoints validate the payload, persist the message, and return
//! `202 Accepted`; delivery happens asynchronously through the dispatch
//! worker. Authentication is owned by the upstream gateway, which attributes
//! requests via `user_id`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Channel, DeliveryReport, Message};
use courier_dispatch::store::{MessageStore, NewMessage};

use crate::state::AppState;

/// Default WhatsApp template reference for `message_type: "template"` sends.
const DEFAULT_TEMPLATE: &str = "hello_world";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/messages/email", post(send_email))
        .route("/api/messages/whatsapp", post(send_whatsapp))
        .route("/api/messages/bulk", post(send_bulk))
        .route("/api/messages", get(message_history))
}

#[derive(Debug, Deserialize)]
struct SendEmailRequest {
    user_id: Uuid,
    to: String,
    subject: String,
    message: String,
    priority: Option<i32>,
    scheduled_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SendWhatsAppRequest {
    user_id: Uuid,
    to: String,
    message: String,
    #[serde(default = "default_message_type")]
    message_type: String,
    template_name: Option<String>,
    priority: Option<i32>,
    scheduled_time: Option<DateTime<Utc>>,
}

fn default_message_type() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize)]
struct SendBulkRequest {
    user_id: Uuid,
    channel: Channel,
    recipients: Vec<String>,
    content: String,
    subject: Option<String>,
    priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    channel: Option<Channel>,
    limit: Option<i64>,
}

/// POST /api/messages/email: queue one email for delivery.
async fn send_email(
    State(state): State<AppState>,
    Json(req): Json<SendEmailRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validate_email_address(&req.to)?;
    if req.subject.trim().is_empty() {
        return Err(AppError::Validation("subject must not be empty".into()));
    }
    if req.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".into()));
    }

    let message = MessageStore::enqueue(
        &state.pool,
        &NewMessage {
            user_id: req.user_id,
            channel: Channel::Email,
            recipient: req.to,
            subject: Some(req.subject),
            body: req.message,
            template_name: None,
        },
        req.priority.unwrap_or(1),
        req.scheduled_time.unwrap_or_else(Utc::now),
        state.config.default_max_attempts,
    )
    .await?;

    Ok(accepted(&message))
}

/// POST /api/messages/whatsapp: queue one WhatsApp message for delivery.
async fn send_whatsapp(
    State(state): State<AppState>,
    Json(req): Json<SendWhatsAppRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validate_phone_number(&req.to)?;
    if req.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".into()));
    }

    let template_name = match req.message_type.as_str() {
        "text" => None,
        "template" => Some(
            req.template_name
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        ),
        other => {
            return Err(AppError::Validation(format!(
                "message_type must be 'text' or 'template', got '{other}'"
            )));
        }
    };

    let message = MessageStore::enqueue(
        &state.pool,
        &NewMessage {
            user_id: req.user_id,
            channel: Channel::Whatsapp,
            recipient: req.to,
            subject: None,
            body: req.message,
            template_name,
        },
        req.priority.unwrap_or(1),
        req.scheduled_time.unwrap_or_else(Utc::now),
        state.config.default_max_attempts,
    )
    .await?;

    Ok(accepted(&message))
}

/// POST /api/messages/bulk: queue one message per recipient with staggered
/// scheduled times, spreading a large send across scan cycles.
async fn send_bulk(
    State(state): State<AppState>,
    Json(req): Json<SendBulkRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if req.recipients.is_empty() {
        return Err(AppError::Validation("recipients must not be empty".into()));
    }
    if req.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".into()));
    }
    match req.channel {
        Channel::Email => {
            if req.subject.as_deref().unwrap_or("").trim().is_empty() {
                return Err(AppError::Validation(
                    "subject is required for email bulk sends".into(),
                ));
            }
            for recipient in &req.recipients {
                validate_email_address(recipient)?;
            }
        }
        Channel::Whatsapp => {
            for recipient in &req.recipients {
                validate_phone_number(recipient)?;
            }
        }
    }

    let stagger = Duration::seconds(state.config.bulk_stagger_secs as i64);
    let base = Utc::now();
    let mut ids = Vec::with_capacity(req.recipients.len());

    for (i, recipient) in req.recipients.iter().enumerate() {
        let message = MessageStore::enqueue(
            &state.pool,
            &NewMessage {
                user_id: req.user_id,
                channel: req.channel,
                recipient: recipient.clone(),
                subject: req.subject.clone(),
                body: req.content.clone(),
                template_name: None,
            },
            req.priority.unwrap_or(1),
            base + stagger * (i as i32),
            state.config.default_max_attempts,
        )
        .await?;
        ids.push(message.id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "data": {
                "message": "Bulk send queued successfully",
                "recipient_count": ids.len(),
                "message_ids": ids,
            }
        })),
    ))
}

/// GET /api/messages: recent message history with per-message outcomes.
async fn message_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let messages = MessageStore::recent(&state.pool, query.channel, limit).await?;

    let reports: Vec<DeliveryReport> = messages
        .iter()
        .map(|m| DeliveryReport {
            message_id: m.id,
            recipient: m.recipient.clone(),
            status: m.status,
            error: m.error_message.clone(),
            provider_message_id: m.provider_message_id.clone(),
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": { "messages": messages, "outcomes": reports }
    })))
}

fn accepted(message: &Message) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "data": {
                "message": format!("{} queued for delivery", message.channel),
                "message_id": message.id,
                "status": message.status,
            }
        })),
    )
}

fn validate_email_address(address: &str) -> Result<(), AppError> {
    let valid = address.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
    });
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "'{address}' is not a valid email address"
        )))
    }
}

fn validate_phone_number(number: &str) -> Result<(), AppError> {
    let rest = number.strip_prefix('+');
    let valid = rest.is_some_and(|digits| {
        digits.len() >= 7 && digits.chars().all(|c| c.is_ascii_digit())
    });
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "'{number}' must start with + and a country code"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email_address("user@example.com").is_ok());
        assert!(validate_email_address("user@sub.example.com").is_ok());
        assert!(validate_email_address("invalid-email").is_err());
        assert!(validate_email_address("user@").is_err());
        assert!(validate_email_address("@example.com").is_err());
        assert!(validate_email_address("user@.com").is_err());
    }

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone_number("+15551234567").is_ok());
        assert!(validate_phone_number("15551234567").is_err());
        assert!(validate_phone_number("+1555").is_err());
        assert!(validate_phone_number("+1555abc4567").is_err());
    }
}
