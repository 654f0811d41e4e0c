//! Queue scanner/claimer — the serialization point of the whole engine.
//!
//! Each cycle claims a bounded batch of due, unlocked, under-attempt-limit
//! queue entries in ONE atomic statement (`FOR UPDATE SKIP LOCKED` plus the
//! `queued → processing` flip), so concurrent scanners can never claim the
//! same entry. Everything after the claim runs safely in parallel across
//! workers: claimed rows are invisible to other scans.
//!
//! A scan cycle never fails because a delivery failed; partition errors are
//! logged and the cycle reports aggregate counts.

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::types::{Channel, DeliveryReport, Message, MessageStatus};

use crate::batch::BatchProcessor;

/// Aggregate outcome of one scan cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub requeued: usize,
}

impl ScanSummary {
    fn absorb(&mut self, reports: &[DeliveryReport]) {
        for report in reports {
            match report.status {
                MessageStatus::Sent => self.sent += 1,
                MessageStatus::Failed => self.failed += 1,
                MessageStatus::Queued => self.requeued += 1,
                _ => {}
            }
        }
    }
}

/// Periodic scanner claiming due queue entries and dispatching them in
/// per-channel batches.
#[derive(Clone)]
pub struct QueueScanner {
    pool: PgPool,
    processor: BatchProcessor,
    /// Lock token stamped on claimed entries; unique per scanner instance.
    worker_id: Uuid,
    batch_size: i64,
    interval: Duration,
}

impl QueueScanner {
    pub fn new(pool: PgPool, processor: BatchProcessor, config: &AppConfig) -> Self {
        Self {
            pool,
            processor,
            worker_id: Uuid::new_v4(),
            batch_size: config.scan_batch_size,
            interval: Duration::from_secs(config.scan_interval_secs),
        }
    }

    /// Start the scan loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            batch_size = self.batch_size,
            interval_secs = self.interval.as_secs(),
            "Queue scanner started"
        );

        loop {
            match self.scan_once().await {
                Ok(summary) if summary.claimed > 0 => {
                    tracing::info!(
                        claimed = summary.claimed,
                        sent = summary.sent,
                        failed = summary.failed,
                        requeued = summary.requeued,
                        "Scan cycle complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Scan cycle failed, will retry next tick");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Claim one bounded batch and dispatch it, returning aggregate counts.
    pub async fn scan_once(&self) -> anyhow::Result<ScanSummary> {
        let claimed = self.claim_batch().await?;

        let mut summary = ScanSummary {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(summary);
        }

        let (email, whatsapp) = partition_by_channel(claimed);

        for (channel, batch) in [(Channel::Email, email), (Channel::Whatsapp, whatsapp)] {
            if batch.is_empty() {
                continue;
            }
            match self.processor.process_batch(channel, &batch).await {
                Ok(reports) => summary.absorb(&reports),
                Err(e) => {
                    // Messages stay locked in `processing`; the stale-lock
                    // sweeper returns them to the queue.
                    tracing::error!(
                        channel = %channel,
                        batch = batch.len(),
                        error = %e,
                        "Batch dispatch failed"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Atomically select due entries and mark them `processing`.
    ///
    /// Selection, lock stamping, and the status flip are one statement, so no
    /// TOCTOU window exists between concurrent workers; `SKIP LOCKED` keeps
    /// scanners from serializing behind each other's row locks.
    pub async fn claim_batch(&self) -> anyhow::Result<Vec<Message>> {
        let claimed: Vec<Message> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT q.id, q.message_id
                FROM message_queue q
                JOIN messages m ON m.id = q.message_id
                WHERE m.status = 'queued'
                  AND q.scheduled_time <= NOW()
                  AND q.locked_by IS NULL
                  AND q.attempts < q.max_attempts
                ORDER BY q.priority ASC, q.scheduled_time ASC
                LIMIT $1
                FOR UPDATE OF q SKIP LOCKED
            ),
            locked AS (
                UPDATE message_queue q
                SET locked_by = $2, locked_at = NOW()
                FROM due
                WHERE q.id = due.id
                RETURNING q.message_id
            )
            UPDATE messages m
            SET status = 'processing', updated_at = NOW()
            FROM locked
            WHERE m.id = locked.message_id AND m.status = 'queued'
            RETURNING m.*
            "#,
        )
        .bind(self.batch_size)
        .bind(self.worker_id)
        .fetch_all(&self.pool)
        .await?;

        if !claimed.is_empty() {
            tracing::debug!(
                worker_id = %self.worker_id,
                claimed = claimed.len(),
                "Claimed queue entries"
            );
        }
        Ok(claimed)
    }
}

/// Split a claimed set into per-channel batches, preserving claim order.
fn partition_by_channel(messages: Vec<Message>) -> (Vec<Message>, Vec<Message>) {
    let mut email = Vec::new();
    let mut whatsapp = Vec::new();
    for message in messages {
        match message.channel {
            Channel::Email => email.push(message),
            Channel::Whatsapp => whatsapp.push(message),
        }
    }
    (email, whatsapp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_message(channel: Channel, recipient: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel,
            recipient: recipient.to_string(),
            subject: None,
            body: "body".to_string(),
            template_name: None,
            status: MessageStatus::Processing,
            provider_message_id: None,
            error_message: None,
            smtp_server_id: None,
            whatsapp_account_id: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    #[test]
    fn test_partition_splits_by_channel_in_order() {
        let messages = vec![
            make_message(Channel::Email, "a@test.com"),
            make_message(Channel::Whatsapp, "+111"),
            make_message(Channel::Email, "b@test.com"),
            make_message(Channel::Whatsapp, "+222"),
        ];

        let (email, whatsapp) = partition_by_channel(messages);

        assert_eq!(email.len(), 2);
        assert_eq!(whatsapp.len(), 2);
        assert_eq!(email[0].recipient, "a@test.com");
        assert_eq!(email[1].recipient, "b@test.com");
        assert_eq!(whatsapp[0].recipient, "+111");
        assert_eq!(whatsapp[1].recipient, "+222");
    }

    #[test]
    fn test_summary_absorbs_reports() {
        let mut summary = ScanSummary::default();
        let reports = vec![
            DeliveryReport {
                message_id: Uuid::new_v4(),
                recipient: "a@test.com".to_string(),
                status: MessageStatus::Sent,
                error: None,
                provider_message_id: None,
            },
            DeliveryReport {
                message_id: Uuid::new_v4(),
                recipient: "b@test.com".to_string(),
                status: MessageStatus::Failed,
                error: Some("boom".to_string()),
                provider_message_id: None,
            },
            DeliveryReport {
                message_id: Uuid::new_v4(),
                recipient: "c@test.com".to_string(),
                status: MessageStatus::Queued,
                error: Some("no available delivery account".to_string()),
                provider_message_id: None,
            },
        ];

        summary.absorb(&reports);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.requeued, 1);
    }
}
