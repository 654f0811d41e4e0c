use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Seconds between queue scan cycles (default: 30)
    pub scan_interval_secs: u64,

    /// Maximum queue entries claimed per scan cycle (default: 50)
    pub scan_batch_size: i64,

    /// Age in seconds after which a queue lock is considered stale (default: 600)
    pub lock_stale_secs: u64,

    /// Seconds between stale-lock sweep cycles (default: 300)
    pub sweep_interval_secs: u64,

    /// Backoff in seconds before a failed-but-retryable message is eligible
    /// again (default: 300)
    pub retry_backoff_secs: u64,

    /// Default attempt ceiling for newly enqueued messages (default: 3)
    pub default_max_attempts: i32,

    /// Gap in seconds between scheduled times of staggered bulk sends (default: 2)
    pub bulk_stagger_secs: u64,

    /// SMTP session timeout in seconds (default: 30)
    pub smtp_timeout_secs: u64,

    /// WhatsApp Cloud API base URL (default: Meta Graph API v18.0)
    pub whatsapp_api_url: String,

    /// WhatsApp HTTP request timeout in seconds (default: 30)
    pub whatsapp_timeout_secs: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            scan_interval_secs: parse_var("SCAN_INTERVAL_SECS", "30")?,
            scan_batch_size: parse_var("SCAN_BATCH_SIZE", "50")?,
            lock_stale_secs: parse_var("LOCK_STALE_SECS", "600")?,
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", "300")?,
            retry_backoff_secs: parse_var("RETRY_BACKOFF_SECS", "300")?,
            default_max_attempts: parse_var("DEFAULT_MAX_ATTEMPTS", "3")?,
            bulk_stagger_secs: parse_var("BULK_STAGGER_SECS", "2")?,
            smtp_timeout_secs: parse_var("SMTP_TIMEOUT_SECS", "30")?,
            whatsapp_api_url: std::env::var("WHATSAPP_API_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v18.0".to_string()),
            whatsapp_timeout_secs: parse_var("WHATSAPP_TIMEOUT_SECS", "30")?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid {}", name, std::any::type_name::<T>()))
}
