//! Database Models
//!
//! Row mappings for the SQLite tables. Numeric prices and sizes are stored
//! as REAL columns and validated at the domain boundary, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-user bot configuration, including the signing key for the user's
/// exchange wallet. Rows with `active = 0` are skipped by the scheduler.
#[derive(Debug, Clone, FromRow)]
pub struct BotConfigRecord {
    pub user_id: String,
    pub active: bool,
    pub model: String,
    /// Comma-separated symbol list, e.g. "BTC,ETH"
    pub symbols: String,
    pub max_leverage: i64,
    pub max_position_size_pct: f64,
    pub daily_loss_limit: f64,
    pub min_account_value: f64,
    pub starting_capital: f64,
    pub wallet_address: String,
    pub wallet_key: String,
    pub testnet: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BotConfigRecord {
    /// Force the risk limit columns into their valid ranges. Stored rows are
    /// written by an external surface and are not trusted to satisfy the
    /// bounds the risk layer assumes; anything outside is clamped and the
    /// adjustment is logged, mirroring how config.rs treats bad env values.
    pub fn clamp_limits(mut self) -> Self {
        if !(1..=50).contains(&self.max_leverage) {
            let clamped = self.max_leverage.clamp(1, 50);
            tracing::warn!(
                user_id = %self.user_id,
                stored = self.max_leverage,
                clamped,
                "max_leverage outside 1..=50, clamping"
            );
            self.max_leverage = clamped;
        }
        if !self.max_position_size_pct.is_finite()
            || !(0.01..=1.0).contains(&self.max_position_size_pct)
        {
            let clamped = if self.max_position_size_pct.is_finite() {
                self.max_position_size_pct.clamp(0.01, 1.0)
            } else {
                0.01
            };
            tracing::warn!(
                user_id = %self.user_id,
                stored = self.max_position_size_pct,
                clamped,
                "max_position_size_pct outside 0.01..=1.0, clamping"
            );
            self.max_position_size_pct = clamped;
        }
        self
    }

    pub fn symbol_list(&self) -> Vec<String> {
        self.symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Locally tracked open position. The exchange remains the source of truth;
/// these rows carry bot-side metadata (reasoning, trigger order ids) and are
/// reconciled against the exchange periodically.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub leverage: i64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub pnl_pct: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub entry_oid: Option<i64>,
    pub sl_oid: Option<i64>,
    pub tp_oid: Option<i64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePosition {
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub leverage: i64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_oid: Option<i64>,
    pub sl_oid: Option<i64>,
    pub tp_oid: Option<i64>,
}

/// Append-only trade ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub action: String,
    pub side: String,
    pub size: f64,
    pub leverage: i64,
    pub price: f64,
    pub pnl: Option<f64>,
    pub reasoning: String,
    pub model: String,
    pub confidence: f64,
    pub tx_ref: Option<String>,
    pub status: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTrade {
    pub user_id: String,
    pub symbol: String,
    pub action: String,
    pub side: String,
    pub size: f64,
    pub leverage: i64,
    pub price: f64,
    pub pnl: Option<f64>,
    pub reasoning: String,
    pub model: String,
    pub confidence: f64,
    pub tx_ref: Option<String>,
}

/// Trading lock row. A row is the lock; expiry makes stale rows reclaimable.
#[derive(Debug, Clone, FromRow)]
pub struct TradingLockRecord {
    pub user_id: String,
    pub lock_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
