//! Provider pool selector: picks a delivery account with spare daily capacity.
//!
//! Accounts (SMTP servers, WhatsApp Business accounts) carry a daily quota.
//! Selection always:
//! 1. Resets counters whose `last_reset_date` is before today, as one
//!    conditional bulk UPDATE (idempotent and safe under concurrent callers)
//! 2. Returns the active account with the lowest `messages_sent_today` that
//!    still has capacity, ties broken by account id
//!
//! Selection never consumes capacity. Counters are incremented through
//! [`ProviderPool::consume`] only after the batch processor has confirmed
//! accepted sends, as a single atomic increment.

use sqlx::PgPool;
use uuid::Uuid;

use courier_common::types::{Channel, SmtpServer, WhatsAppAccount};

/// A selected delivery account for one channel.
#[derive(Debug, Clone)]
pub enum ProviderAccount {
    Smtp(SmtpServer),
    WhatsApp(WhatsAppAccount),
}

impl ProviderAccount {
    pub fn id(&self) -> Uuid {
        match self {
            ProviderAccount::Smtp(s) => s.id,
            ProviderAccount::WhatsApp(a) => a.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProviderAccount::Smtp(s) => &s.name,
            ProviderAccount::WhatsApp(a) => &a.name,
        }
    }
}

/// Stateless selector over the provider account tables.
pub struct ProviderPool;

impl ProviderPool {
    /// Select an account with spare capacity for the given channel.
    ///
    /// Returns `None` when every account is inactive or exhausted; the caller
    /// treats that as a scheduling failure, not a delivery attempt.
    pub async fn select_account(
        pool: &PgPool,
        channel: Channel,
    ) -> anyhow::Result<Option<ProviderAccount>> {
        Self::reset_expired(pool, channel).await?;

        match channel {
            Channel::Email => {
                let server: Option<SmtpServer> = sqlx::query_as(
                    r#"
                    SELECT * FROM smtp_servers
                    WHERE is_active = true AND messages_sent_today < daily_limit
                    ORDER BY messages_sent_today ASC, id ASC
                    LIMIT 1
                    "#,
                )
                .fetch_optional(pool)
                .await?;
                Ok(server.map(ProviderAccount::Smtp))
            }
            Channel::Whatsapp => {
                let account: Option<WhatsAppAccount> = sqlx::query_as(
                    r#"
                    SELECT * FROM whatsapp_accounts
                    WHERE is_active = true AND messages_sent_today < daily_limit
                    ORDER BY messages_sent_today ASC, id ASC
                    LIMIT 1
                    "#,
                )
                .fetch_optional(pool)
                .await?;
                Ok(account.map(ProviderAccount::WhatsApp))
            }
        }
    }

    /// Consume capacity after `sent` confirmed sends through `account`.
    ///
    /// A single atomic increment, never read-modify-write, so concurrent
    /// batches cannot lose updates.
    pub async fn consume(
        pool: &PgPool,
        account: &ProviderAccount,
        sent: i32,
    ) -> anyhow::Result<()> {
        let query = match account {
            ProviderAccount::Smtp(_) => {
                "UPDATE smtp_servers SET messages_sent_today = messages_sent_today + $1 WHERE id = $2"
            }
            ProviderAccount::WhatsApp(_) => {
                "UPDATE whatsapp_accounts SET messages_sent_today = messages_sent_today + $1 WHERE id = $2"
            }
        };

        sqlx::query(query)
            .bind(sent)
            .bind(account.id())
            .execute(pool)
            .await?;

        tracing::debug!(
            account = account.name(),
            sent,
            "Consumed provider capacity"
        );
        Ok(())
    }

    /// Zero counters whose reset date is behind today.
    ///
    /// A conditional bulk update: each row resets exactly once per day no
    /// matter how many callers race here.
    async fn reset_expired(pool: &PgPool, channel: Channel) -> anyhow::Result<()> {
        let query = match channel {
            Channel::Email => {
                r#"
                UPDATE smtp_servers
                SET messages_sent_today = 0, last_reset_date = CURRENT_DATE
                WHERE last_reset_date < CURRENT_DATE
                "#
            }
            Channel::Whatsapp => {
                r#"
                UPDATE whatsapp_accounts
                SET messages_sent_today = 0, last_reset_date = CURRENT_DATE
                WHERE last_reset_date < CURRENT_DATE
                "#
            }
        };

        let result = sqlx::query(query).execute(pool).await?;
        if result.rows_affected() > 0 {
            tracing::info!(
                channel = %channel,
                accounts = result.rows_affected(),
                "Reset daily usage counters"
            );
        }
        Ok(())
    }
}
