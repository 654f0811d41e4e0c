//! Batch processor: delivers one claimed, same-channel batch through one
//! provider account.
//!
//! The two channels are deliberately asymmetric:
//! - Email batches ride a single SMTP session and are all-or-nothing; the
//!   transport gives no per-message partial result.
//! - WhatsApp has no batch transport primitive, so each message succeeds or
//!   fails independently.
//!
//! Capacity is consumed only for confirmed sends: the whole batch size for a
//! successful email batch, the success count for WhatsApp.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::types::{Channel, DeliveryReport, Message, MessageStatus};

use crate::email;
use crate::provider::{ProviderAccount, ProviderPool};
use crate::store::MessageStore;
use crate::whatsapp::{WhatsAppClient, WhatsAppOutcome};

/// Error text recorded when no provider account has spare capacity.
pub const NO_ACCOUNT_ERROR: &str = "no available delivery account";

/// Delivers claimed batches and records their outcomes.
#[derive(Clone)]
pub struct BatchProcessor {
    pool: PgPool,
    whatsapp: WhatsAppClient,
    smtp_timeout: Duration,
    retry_backoff: chrono::Duration,
}

impl BatchProcessor {
    pub fn new(pool: PgPool, config: &AppConfig) -> anyhow::Result<Self> {
        let whatsapp = WhatsAppClient::new(
            &config.whatsapp_api_url,
            Duration::from_secs(config.whatsapp_timeout_secs),
        )?;
        Ok(Self {
            pool,
            whatsapp,
            smtp_timeout: Duration::from_secs(config.smtp_timeout_secs),
            retry_backoff: chrono::Duration::seconds(config.retry_backoff_secs as i64),
        })
    }

    /// Deliver a non-empty batch of `processing` messages, all on `channel`.
    ///
    /// Never escalates delivery failures: every outcome is recorded on the
    /// messages and surfaced in the returned reports.
    pub async fn process_batch(
        &self,
        channel: Channel,
        batch: &[Message],
    ) -> anyhow::Result<Vec<DeliveryReport>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // Fresh read; a batch never rides a previously cached selection.
        let account = ProviderPool::select_account(&self.pool, channel).await?;

        let Some(account) = account else {
            // Scheduling failure: back to the queue, attempts untouched.
            let ids: Vec<Uuid> = batch.iter().map(|m| m.id).collect();
            MessageStore::requeue_without_attempt(&self.pool, &ids, NO_ACCOUNT_ERROR).await?;
            tracing::warn!(
                channel = %channel,
                batch = batch.len(),
                "No provider account with spare capacity; batch requeued"
            );
            return Ok(batch
                .iter()
                .map(|m| DeliveryReport {
                    message_id: m.id,
                    recipient: m.recipient.clone(),
                    status: MessageStatus::Queued,
                    error: Some(NO_ACCOUNT_ERROR.to_string()),
                    provider_message_id: None,
                })
                .collect());
        };

        let reports = match (&account, channel) {
            (ProviderAccount::Smtp(server), Channel::Email) => {
                self.process_email_batch(&account, server.clone(), batch)
                    .await?
            }
            (ProviderAccount::WhatsApp(wa), Channel::Whatsapp) => {
                self.process_whatsapp_batch(&account, wa.clone(), batch)
                    .await?
            }
            _ => {
                anyhow::bail!("Provider account does not match channel {channel}");
            }
        };

        let sent = reports
            .iter()
            .filter(|r| r.status == MessageStatus::Sent)
            .count();
        tracing::info!(
            channel = %channel,
            account = account.name(),
            batch = batch.len(),
            sent,
            failed = batch.len() - sent,
            "Batch processed"
        );
        Ok(reports)
    }

    /// One SMTP session for the whole batch; all-or-nothing.
    async fn process_email_batch(
        &self,
        account: &ProviderAccount,
        server: courier_common::types::SmtpServer,
        batch: &[Message],
    ) -> anyhow::Result<Vec<DeliveryReport>> {
        let ids: Vec<Uuid> = batch.iter().map(|m| m.id).collect();

        match email::send_batch(&server, batch, self.smtp_timeout).await {
            Ok(()) => {
                let sent_at = Utc::now();
                MessageStore::mark_batch_sent(&self.pool, &ids, server.id, sent_at).await?;
                ProviderPool::consume(&self.pool, account, batch.len() as i32).await?;
                Ok(batch
                    .iter()
                    .map(|m| DeliveryReport {
                        message_id: m.id,
                        recipient: m.recipient.clone(),
                        status: MessageStatus::Sent,
                        error: None,
                        provider_message_id: None,
                    })
                    .collect())
            }
            Err(transport_error) => {
                // Whole-session failure degrades every message with the same
                // error text; the account counter is untouched.
                let mut reports = Vec::with_capacity(batch.len());
                for message in batch {
                    let status = MessageStore::record_attempt_failure(
                        &self.pool,
                        message.id,
                        &transport_error,
                        self.retry_backoff,
                    )
                    .await?;
                    reports.push(DeliveryReport {
                        message_id: message.id,
                        recipient: message.recipient.clone(),
                        status,
                        error: Some(transport_error.clone()),
                        provider_message_id: None,
                    });
                }
                Ok(reports)
            }
        }
    }

    /// Per-message delivery; only successes consume capacity.
    async fn process_whatsapp_batch(
        &self,
        account: &ProviderAccount,
        wa: courier_common::types::WhatsAppAccount,
        batch: &[Message],
    ) -> anyhow::Result<Vec<DeliveryReport>> {
        let mut reports = Vec::with_capacity(batch.len());
        let mut successes = 0i32;

        for message in batch {
            match self.whatsapp.send(&wa, message).await {
                WhatsAppOutcome::Sent { message_id } => {
                    MessageStore::mark_whatsapp_sent(
                        &self.pool,
                        message.id,
                        wa.id,
                        &message_id,
                        Utc::now(),
                    )
                    .await?;
                    successes += 1;
                    reports.push(DeliveryReport {
                        message_id: message.id,
                        recipient: message.recipient.clone(),
                        status: MessageStatus::Sent,
                        error: None,
                        provider_message_id: Some(message_id),
                    });
                }
                WhatsAppOutcome::Failed { reason } => {
                    let status = MessageStore::record_attempt_failure(
                        &self.pool,
                        message.id,
                        &reason,
                        self.retry_backoff,
                    )
                    .await?;
                    reports.push(DeliveryReport {
                        message_id: message.id,
                        recipient: message.recipient.clone(),
                        status,
                        error: Some(reason),
                        provider_message_id: None,
                    });
                }
            }
        }

        if successes > 0 {
            ProviderPool::consume(&self.pool, account, successes).await?;
        }
        Ok(reports)
    }
}
