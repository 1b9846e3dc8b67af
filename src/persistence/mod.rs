//! Persistence Layer
//!
//! SQLite storage for bot configurations, open positions, the append-only
//! trade ledger, and per-user trading locks. Schema creation is idempotent
//! and runs at startup.

pub mod lock;
pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure the data directory exists for file-backed databases
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_configs (
            user_id TEXT PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 0,
            model TEXT NOT NULL,
            symbols TEXT NOT NULL,
            max_leverage INTEGER NOT NULL,
            max_position_size_pct REAL NOT NULL,
            daily_loss_limit REAL NOT NULL,
            min_account_value REAL NOT NULL,
            starting_capital REAL NOT NULL,
            wallet_address TEXT NOT NULL,
            wallet_key TEXT NOT NULL,
            testnet INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_configs table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('LONG', 'SHORT')),
            size REAL NOT NULL,
            leverage INTEGER NOT NULL,
            entry_price REAL NOT NULL,
            current_price REAL NOT NULL,
            unrealized_pnl REAL NOT NULL DEFAULT 0.0,
            pnl_pct REAL NOT NULL DEFAULT 0.0,
            stop_loss REAL,
            take_profit REAL,
            liquidation_price REAL,
            entry_oid INTEGER,
            sl_oid INTEGER,
            tp_oid INTEGER,
            opened_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, symbol)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create positions table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('open', 'close')),
            side TEXT NOT NULL CHECK(side IN ('LONG', 'SHORT')),
            size REAL NOT NULL,
            leverage INTEGER NOT NULL,
            price REAL NOT NULL,
            pnl REAL,
            reasoning TEXT NOT NULL,
            model TEXT NOT NULL,
            confidence REAL NOT NULL,
            tx_ref TEXT,
            status TEXT NOT NULL DEFAULT 'executed' CHECK(status IN ('executed', 'failed')),
            executed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trading_locks (
            user_id TEXT PRIMARY KEY,
            lock_id TEXT NOT NULL,
            acquired_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create trading_locks table: {}", e))
    })?;

    Ok(())
}
