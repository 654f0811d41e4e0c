//! Stale lock sweeper.
//!
//! A worker crash can leave claimed messages stuck in `processing` with a
//! lock that will never be released. The sweeper finds locks older than a
//! threshold, clears them, and returns the messages to `queued` in one
//! statement, making the entries eligible for the next scan cycle. It runs
//! automatically on a timer and is also reachable on demand through the API.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use courier_common::config::AppConfig;

/// Timer loop releasing expired queue locks.
#[derive(Clone)]
pub struct LockSweeper {
    pool: PgPool,
    stale_after: chrono::Duration,
    interval: Duration,
}

impl LockSweeper {
    pub fn new(pool: PgPool, config: &AppConfig) -> Self {
        Self {
            pool,
            stale_after: chrono::Duration::seconds(config.lock_stale_secs as i64),
            interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }

    /// Start the sweep loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            stale_after_secs = self.stale_after.num_seconds(),
            interval_secs = self.interval.as_secs(),
            "Lock sweeper started"
        );

        loop {
            match self.release_stale().await {
                Ok(released) if released > 0 => {
                    tracing::warn!(released, "Released stale queue locks");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Stale lock sweep failed, will retry next tick");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Release locks older than the threshold and requeue their messages.
    /// Returns the number of released entries.
    pub async fn release_stale(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - self.stale_after;

        let result = sqlx::query(
            r#"
            WITH released AS (
                UPDATE message_queue
                SET locked_by = NULL, locked_at = NULL
                WHERE locked_at IS NOT NULL AND locked_at < $1
                RETURNING message_id
            )
            UPDATE messages m
            SET status = 'queued', updated_at = NOW()
            FROM released
            WHERE m.id = released.message_id AND m.status = 'processing'
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
