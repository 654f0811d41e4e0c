//! Shared application state for the Axum API server.

use sqlx::PgPool;

use courier_common::config::AppConfig;
use courier_dispatch::scanner::QueueScanner;
use courier_dispatch::sweeper::LockSweeper;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub scanner: QueueScanner,
    pub sweeper: LockSweeper,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        scanner: QueueScanner,
        sweeper: LockSweeper,
    ) -> Self {
        Self {
            pool,
            config,
            scanner,
            sweeper,
        }
    }
}
