//! Message/queue store operations.
//!
//! Every status mutation validates its move against the [`MessageStatus`]
//! transition table and guards the SQL with `WHERE status = $expected`. A row
//! already moved by a concurrent worker simply does not match the guard (a
//! lost race is a silent skip, not an error).
//!
//! Attempt accounting happens here, when a delivery outcome is recorded:
//! both successful and failed deliveries count against `max_attempts`;
//! capacity failures do not.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Channel, Message, MessageStatus, QueueEntry};

/// Fields supplied by the boundary API when a send is requested.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub template_name: Option<String>,
}

/// Store operations over the `messages` and `message_queue` tables.
pub struct MessageStore;

impl MessageStore {
    /// Create a message and its queue entry, promoting `pending → queued`
    /// within one transaction.
    pub async fn enqueue(
        pool: &PgPool,
        new: &NewMessage,
        priority: i32,
        scheduled_time: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Message, AppError> {
        ensure_transition(MessageStatus::Pending, MessageStatus::Queued)?;

        let mut tx = pool.begin().await?;

        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO messages (id, user_id, channel, recipient, subject, body, template_name, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            "#,
        )
        .bind(message_id)
        .bind(new.user_id)
        .bind(new.channel)
        .bind(&new.recipient)
        .bind(&new.subject)
        .bind(&new.body)
        .bind(&new.template_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO message_queue (id, message_id, priority, scheduled_time, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(priority)
        .bind(scheduled_time)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?;

        let message: Message = sqlx::query_as(
            r#"
            UPDATE messages SET status = 'queued', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(message_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            message_id = %message.id,
            channel = %message.channel,
            recipient = %message.recipient,
            priority,
            "Message enqueued"
        );
        Ok(message)
    }

    /// Record a confirmed email batch delivery: every message becomes `sent`
    /// with one shared `sent_at`, bound to the server that carried the batch.
    pub async fn mark_batch_sent(
        pool: &PgPool,
        message_ids: &[Uuid],
        smtp_server_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        ensure_transition(MessageStatus::Processing, MessageStatus::Sent)?;

        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sent',
                sent_at = $2,
                smtp_server_id = $3,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = ANY($1) AND status = 'processing'
            "#,
        )
        .bind(message_ids)
        .bind(sent_at)
        .bind(smtp_server_id)
        .execute(&mut *tx)
        .await?;

        finish_attempt(&mut *tx, message_ids).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Record one confirmed WhatsApp delivery with its provider message id.
    pub async fn mark_whatsapp_sent(
        pool: &PgPool,
        message_id: Uuid,
        whatsapp_account_id: Uuid,
        provider_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        ensure_transition(MessageStatus::Processing, MessageStatus::Sent)?;

        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sent',
                sent_at = $2,
                whatsapp_account_id = $3,
                provider_message_id = $4,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(message_id)
        .bind(sent_at)
        .bind(whatsapp_account_id)
        .bind(provider_message_id)
        .execute(&mut *tx)
        .await?;

        finish_attempt(&mut *tx, &[message_id]).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `attempts` and either requeues the message with a backoff
    /// (`processing → queued`) when attempts remain, or marks it terminally
    /// `failed`. Returns the resulting status.
    pub async fn record_attempt_failure(
        pool: &PgPool,
        message_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> Result<MessageStatus, AppError> {
        let mut tx = pool.begin().await?;

        let row: Option<(i32, i32)> = sqlx::query_as(
            r#"
            UPDATE message_queue
            SET attempts = attempts + 1,
                locked_by = NULL,
                locked_at = NULL,
                scheduled_time = CASE
                    WHEN attempts + 1 < max_attempts THEN $2
                    ELSE scheduled_time
                END
            WHERE message_id = $1 AND attempts < max_attempts
            RETURNING attempts, max_attempts
            "#,
        )
        .bind(message_id)
        .bind(Utc::now() + backoff)
        .fetch_optional(&mut *tx)
        .await?;

        let retryable = match row {
            Some((attempts, max_attempts)) => attempts < max_attempts,
            // Entry already at its ceiling; the outcome is terminal.
            None => false,
        };

        let next = if retryable {
            MessageStatus::Queued
        } else {
            MessageStatus::Failed
        };
        ensure_transition(MessageStatus::Processing, next)?;

        sqlx::query(
            r#"
            UPDATE messages
            SET status = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(message_id)
        .bind(next)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::warn!(
            message_id = %message_id,
            error,
            status = %next,
            "Delivery attempt failed"
        );
        Ok(next)
    }

    /// Return a claimed batch to the queue without counting an attempt.
    ///
    /// Used for capacity exhaustion: a scheduling failure, retried on the
    /// next scan cycle.
    pub async fn requeue_without_attempt(
        pool: &PgPool,
        message_ids: &[Uuid],
        error: &str,
    ) -> Result<u64, AppError> {
        ensure_transition(MessageStatus::Processing, MessageStatus::Queued)?;

        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE message_queue SET locked_by = NULL, locked_at = NULL WHERE message_id = ANY($1)",
        )
        .bind(message_ids)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'queued', error_message = $2, updated_at = NOW()
            WHERE id = ANY($1) AND status = 'processing'
            "#,
        )
        .bind(message_ids)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Load messages by id, in no particular order.
    pub async fn load(pool: &PgPool, message_ids: &[Uuid]) -> Result<Vec<Message>, AppError> {
        let messages: Vec<Message> = sqlx::query_as("SELECT * FROM messages WHERE id = ANY($1)")
            .bind(message_ids)
            .fetch_all(pool)
            .await?;
        Ok(messages)
    }

    /// Recent messages for the history endpoint, newest first.
    pub async fn recent(
        pool: &PgPool,
        channel: Option<Channel>,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let messages: Vec<Message> = match channel {
            Some(channel) => {
                sqlx::query_as(
                    "SELECT * FROM messages WHERE channel = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(channel)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM messages ORDER BY created_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(messages)
    }

    /// Queue entries in claim order, for inspection.
    pub async fn queue_entries(pool: &PgPool, limit: i64) -> Result<Vec<QueueEntry>, AppError> {
        let entries: Vec<QueueEntry> = sqlx::query_as(
            "SELECT * FROM message_queue ORDER BY priority ASC, scheduled_time ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(entries)
    }
}

/// Reject any move the transition table forbids.
fn ensure_transition(from: MessageStatus, to: MessageStatus) -> Result<(), AppError> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!("{from} → {to}")))
    }
}

/// Count the attempt and release queue locks after a terminal outcome; the
/// entry stays behind as the attempt record.
async fn finish_attempt<'e, E: PgExecutor<'e>>(
    executor: E,
    message_ids: &[Uuid],
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE message_queue
        SET attempts = LEAST(attempts + 1, max_attempts),
            locked_by = NULL,
            locked_at = NULL
        WHERE message_id = ANY($1)
        "#,
    )
    .bind(message_ids)
    .execute(executor)
    .await?;
    Ok(())
}
