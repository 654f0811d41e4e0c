use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Whatsapp,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Whatsapp => write!(f, "whatsapp"),
        }
    }
}

/// Message lifecycle status.
///
/// Transitions are validated through [`MessageStatus::can_transition`] and
/// mirrored by guarded SQL updates (`WHERE status = $expected`), so a row
/// already moved by a concurrent worker is never transitioned twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Queued,
    Processing,
    Sent,
    Failed,
}

impl MessageStatus {
    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// The forward path is `pending → queued → processing → {sent, failed}`.
    /// `processing → queued` is the single recovery transition, used when an
    /// attempt fails with attempts remaining, when no provider account has
    /// spare capacity, or when a stale lock is released.
    pub fn can_transition(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Processing)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Queued)
        )
    }

    /// `sent` and `failed` are terminal; no further transitions occur.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Queued => write!(f, "queued"),
            MessageStatus::Processing => write!(f, "processing"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A trackable outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    /// Email only.
    pub subject: Option<String>,
    pub body: String,
    /// WhatsApp template sends carry a fixed template reference instead of
    /// a literal body.
    pub template_name: Option<String>,
    pub status: MessageStatus,
    /// Provider-assigned id, WhatsApp only.
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub smtp_server_id: Option<Uuid>,
    pub whatsapp_account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Scheduling state for a queued message, one-to-one with [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: Uuid,
    pub message_id: Uuid,
    /// Lower is more urgent.
    pub priority: i32,
    /// Not eligible for claiming before this instant.
    pub scheduled_time: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    /// Worker lock token; present while a scan cycle owns this entry.
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A credentialed SMTP sending identity with a daily quota.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SmtpServer {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub is_active: bool,
    pub daily_limit: i32,
    pub messages_sent_today: i32,
    pub last_reset_date: NaiveDate,
}

/// A WhatsApp Business sending identity with a daily quota.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WhatsAppAccount {
    pub id: Uuid,
    pub name: String,
    pub phone_number_id: String,
    pub access_token: String,
    pub is_active: bool,
    pub daily_limit: i32,
    pub messages_sent_today: i32,
    pub last_reset_date: NaiveDate,
}

/// Per-message delivery outcome surfaced to observability and the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub message_id: Uuid,
    pub recipient: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use MessageStatus::*;
        assert!(Pending.can_transition(Queued));
        assert!(Queued.can_transition(Processing));
        assert!(Processing.can_transition(Sent));
        assert!(Processing.can_transition(Failed));
    }

    #[test]
    fn test_recovery_transition_allowed() {
        assert!(MessageStatus::Processing.can_transition(MessageStatus::Queued));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        use MessageStatus::*;
        assert!(!Pending.can_transition(Processing));
        assert!(!Pending.can_transition(Sent));
        assert!(!Queued.can_transition(Sent));
        assert!(!Queued.can_transition(Failed));
        assert!(!Sent.can_transition(Queued));
        assert!(!Sent.can_transition(Failed));
        assert!(!Failed.can_transition(Queued));
        assert!(!Failed.can_transition(Processing));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
        assert!(!MessageStatus::Queued.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
    }

    #[test]
    fn test_channel_display_matches_db_encoding() {
        assert_eq!(Channel::Email.to_string(), "email");
        assert_eq!(Channel::Whatsapp.to_string(), "whatsapp");
    }
}
