//! Repositories
//!
//! Query layer over the SQLite pool. Each repository is a thin struct over
//! the shared pool; constructors are cheap and clones share the pool.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::models::{
    BotConfigRecord, CreatePosition, CreateTrade, PositionRecord, TradeRecord,
};
use super::{DatabaseError, DbPool};

fn new_row_id() -> String {
    // 16 random bytes, hex encoded. Collision-free enough for row ids.
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct BotConfigRepository {
    pool: DbPool,
}

impl BotConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All configurations with trading enabled. Risk limit columns are
    /// clamped into their valid ranges on the way out.
    pub async fn get_active(&self) -> Result<Vec<BotConfigRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, BotConfigRecord>(
            "SELECT * FROM bot_configs WHERE active = 1 ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch active configs: {}", e)))?;
        Ok(rows.into_iter().map(BotConfigRecord::clamp_limits).collect())
    }

    pub async fn get_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<BotConfigRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, BotConfigRecord>("SELECT * FROM bot_configs WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch config: {}", e)))?;
        Ok(row.map(BotConfigRecord::clamp_limits))
    }

    pub async fn set_active(&self, user_id: &str, active: bool) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE bot_configs SET active = ?, updated_at = CURRENT_TIMESTAMP WHERE user_id = ?",
        )
        .bind(active)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to update config: {}", e)))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the position row for (user, symbol).
    pub async fn upsert(&self, position: CreatePosition) -> Result<PositionRecord, DatabaseError> {
        let id = new_row_id();
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, user_id, symbol, side, size, leverage, entry_price, current_price,
                 stop_loss, take_profit, entry_oid, sl_oid, tp_oid)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, symbol) DO UPDATE SET
                side = excluded.side,
                size = excluded.size,
                leverage = excluded.leverage,
                entry_price = excluded.entry_price,
                current_price = excluded.current_price,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                entry_oid = excluded.entry_oid,
                sl_oid = excluded.sl_oid,
                tp_oid = excluded.tp_oid,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&id)
        .bind(&position.user_id)
        .bind(&position.symbol)
        .bind(&position.side)
        .bind(position.size)
        .bind(position.leverage)
        .bind(position.entry_price)
        .bind(position.entry_price)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.entry_oid)
        .bind(position.sl_oid)
        .bind(position.tp_oid)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to upsert position: {}", e)))?;

        let record = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ? AND symbol = ?",
        )
        .bind(&position.user_id)
        .bind(&position.symbol)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to read back position: {}", e)))?;

        debug!(
            user_id = %record.user_id,
            symbol = %record.symbol,
            side = %record.side,
            "Position stored"
        );
        Ok(record)
    }

    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ? ORDER BY opened_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch positions: {}", e)))
    }

    pub async fn get_all(&self) -> Result<Vec<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions ORDER BY user_id, symbol")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch positions: {}", e)))
    }

    pub async fn get_by_user_and_symbol(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> Result<Option<PositionRecord>, DatabaseError> {
        sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ? AND symbol = ?",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch position: {}", e)))
    }

    /// Refresh the mark price and derived pnl columns on an open position.
    pub async fn update_price(
        &self,
        user_id: &str,
        symbol: &str,
        current_price: f64,
        unrealized_pnl: f64,
        pnl_pct: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE positions
            SET current_price = ?, unrealized_pnl = ?, pnl_pct = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ? AND symbol = ?
            "#,
        )
        .bind(current_price)
        .bind(unrealized_pnl)
        .bind(pnl_pct)
        .bind(user_id)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to update position: {}", e)))?;
        Ok(())
    }

    pub async fn delete(&self, user_id: &str, symbol: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM positions WHERE user_id = ? AND symbol = ?")
            .bind(user_id)
            .bind(symbol)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to delete position: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, trade: CreateTrade) -> Result<TradeRecord, DatabaseError> {
        self.insert(trade, "executed").await
    }

    /// Ledger row for an intent the exchange refused or that errored
    /// mid-flight. Failed rows are excluded from realized-pnl sums.
    pub async fn create_failed(&self, trade: CreateTrade) -> Result<TradeRecord, DatabaseError> {
        self.insert(trade, "failed").await
    }

    async fn insert(&self, trade: CreateTrade, status: &str) -> Result<TradeRecord, DatabaseError> {
        let id = new_row_id();
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, user_id, symbol, action, side, size, leverage, price, pnl,
                 reasoning, model, confidence, tx_ref, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&trade.user_id)
        .bind(&trade.symbol)
        .bind(&trade.action)
        .bind(&trade.side)
        .bind(trade.size)
        .bind(trade.leverage)
        .bind(trade.price)
        .bind(trade.pnl)
        .bind(&trade.reasoning)
        .bind(&trade.model)
        .bind(trade.confidence)
        .bind(&trade.tx_ref)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to record trade: {}", e)))?;

        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to read back trade: {}", e)))
    }

    pub async fn get_by_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<TradeRecord>, DatabaseError> {
        sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE user_id = ? ORDER BY executed_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to fetch trades: {}", e)))
    }

    /// Sum of realized pnl on closing trades since the cutoff. Used for the
    /// daily loss limit, with the cutoff at UTC midnight.
    pub async fn realized_pnl_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<f64, DatabaseError> {
        let total: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT SUM(pnl) FROM trades
            WHERE user_id = ? AND action = 'close' AND status = 'executed'
              AND executed_at >= ?
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to sum realized pnl: {}", e)))?;
        Ok(total.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    async fn test_pool() -> DbPool {
        init_database("sqlite::memory:")
            .await
            .expect("in-memory database")
    }

    fn sample_position(user: &str, symbol: &str) -> CreatePosition {
        CreatePosition {
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            side: "LONG".to_string(),
            size: 0.5,
            leverage: 5,
            entry_price: 60_000.0,
            stop_loss: Some(58_000.0),
            take_profit: Some(65_000.0),
            entry_oid: Some(101),
            sl_oid: Some(102),
            tp_oid: Some(103),
        }
    }

    #[tokio::test]
    async fn upsert_then_fetch_position() {
        let pool = test_pool().await;
        let repo = PositionRepository::new(pool);

        let created = repo.upsert(sample_position("alice", "BTC")).await.unwrap();
        assert_eq!(created.side, "LONG");
        assert_eq!(created.current_price, 60_000.0);

        let fetched = repo
            .get_by_user_and_symbol("alice", "BTC")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.entry_oid, Some(101));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row_for_same_symbol() {
        let pool = test_pool().await;
        let repo = PositionRepository::new(pool);

        repo.upsert(sample_position("alice", "BTC")).await.unwrap();
        let mut replacement = sample_position("alice", "BTC");
        replacement.side = "SHORT".to_string();
        replacement.size = 1.0;
        repo.upsert(replacement).await.unwrap();

        let all = repo.get_by_user("alice").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].side, "SHORT");
        assert_eq!(all[0].size, 1.0);
    }

    #[tokio::test]
    async fn update_price_and_delete() {
        let pool = test_pool().await;
        let repo = PositionRepository::new(pool);

        repo.upsert(sample_position("bob", "ETH")).await.unwrap();
        repo.update_price("bob", "ETH", 61_000.0, 500.0, 8.3)
            .await
            .unwrap();

        let row = repo
            .get_by_user_and_symbol("bob", "ETH")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.current_price, 61_000.0);
        assert_eq!(row.unrealized_pnl, 500.0);

        assert!(repo.delete("bob", "ETH").await.unwrap());
        assert!(!repo.delete("bob", "ETH").await.unwrap());
    }

    #[tokio::test]
    async fn realized_pnl_sums_only_closes() {
        let pool = test_pool().await;
        let repo = TradeRepository::new(pool);

        let base = CreateTrade {
            user_id: "alice".to_string(),
            symbol: "BTC".to_string(),
            action: "open".to_string(),
            side: "LONG".to_string(),
            size: 0.5,
            leverage: 5,
            price: 60_000.0,
            pnl: None,
            reasoning: "momentum".to_string(),
            model: "test-model".to_string(),
            confidence: 0.8,
            tx_ref: None,
        };
        repo.create(base.clone()).await.unwrap();

        let mut close = base.clone();
        close.action = "close".to_string();
        close.pnl = Some(-120.0);
        repo.create(close).await.unwrap();

        let mut close2 = base.clone();
        close2.action = "close".to_string();
        close2.pnl = Some(40.0);
        repo.create(close2).await.unwrap();

        // Failed intents never count toward realized pnl
        let mut failed = base;
        failed.action = "close".to_string();
        failed.pnl = Some(-999.0);
        repo.create_failed(failed).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        let pnl = repo.realized_pnl_since("alice", since).await.unwrap();
        assert!((pnl - (-80.0)).abs() < 1e-9);

        // Nothing recorded for other users
        let other = repo.realized_pnl_since("bob", since).await.unwrap();
        assert_eq!(other, 0.0);
    }

    async fn insert_raw_config(pool: &DbPool, user_id: &str, leverage: i64, pct: f64) {
        sqlx::query(
            r#"
            INSERT INTO bot_configs
                (user_id, active, model, symbols, max_leverage, max_position_size_pct,
                 daily_loss_limit, min_account_value, starting_capital,
                 wallet_address, wallet_key, testnet)
            VALUES (?, 1, 'test-model', 'BTC', ?, ?, 500.0, 50.0, 1000.0, '0xabc', '0xkey', 1)
            "#,
        )
        .bind(user_id)
        .bind(leverage)
        .bind(pct)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn config_limits_are_clamped_on_load() {
        let pool = test_pool().await;
        let repo = BotConfigRepository::new(pool.clone());

        insert_raw_config(&pool, "alice", -3, 5.0).await;
        insert_raw_config(&pool, "bob", 10, 0.1).await;

        let active = repo.get_active().await.unwrap();
        let alice = active.iter().find(|c| c.user_id == "alice").unwrap();
        assert_eq!(alice.max_leverage, 1);
        assert_eq!(alice.max_position_size_pct, 1.0);

        // In-range rows come back untouched
        let bob = repo.get_by_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.max_leverage, 10);
        assert_eq!(bob.max_position_size_pct, 0.1);

        // get_by_user clamps the same way
        let direct = repo.get_by_user("alice").await.unwrap().unwrap();
        assert_eq!(direct.max_leverage, 1);
        assert_eq!(direct.max_position_size_pct, 1.0);
    }
}
