//! Courier dispatch worker binary entrypoint.
//!
//! Runs the queue scan loop and the stale-lock sweep loop until interrupted.
//! Any number of worker processes may run concurrently; the claim transaction
//! keeps them from dispatching the same message twice.

use courier_common::config::AppConfig;
use courier_common::db;

use courier_dispatch::batch::BatchProcessor;
use courier_dispatch::scanner::QueueScanner;
use courier_dispatch::sweeper::LockSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_dispatch=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier dispatch worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let processor = BatchProcessor::new(pool.clone(), &config)?;
    let scanner = QueueScanner::new(pool.clone(), processor, &config);
    let sweeper = LockSweeper::new(pool, &config);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = scanner.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Queue scanner exited with error");
                return Err(e);
            }
        }
        result = sweeper.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Lock sweeper exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Courier dispatch worker stopped.");
    Ok(())
}
