//! Trading Locks
//!
//! Per-user mutual exclusion backed by a database row. At most one trading
//! cycle may act for a user at a time; a 120 second expiry reclaims locks
//! abandoned by a crashed cycle. Release is guarded by the lock id so a
//! cycle can never release a lock it no longer holds.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::errors::LockError;

use super::models::TradingLockRecord;
use super::DbPool;

/// Lock lifetime. A cycle that outlives this is presumed dead.
pub const LOCK_EXPIRY_SECS: i64 = 120;

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Handle returned by a successful acquire. Carries the id the store
/// demands back on release.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub user_id: String,
    pub lock_id: String,
}

#[derive(Clone)]
pub struct TradingLockStore {
    pool: DbPool,
    now_fn: NowFn,
}

impl TradingLockStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            now_fn: Arc::new(Utc::now),
        }
    }

    /// Replace the clock. Test-only seam for expiry behavior.
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// Try to take the lock for a user. An expired row counts as absent
    /// and is reclaimed. Returns `LockError::Held` if a live lock exists.
    pub async fn acquire(&self, user_id: &str) -> Result<LockHandle, LockError> {
        let now = self.now();

        // Reclaim an expired lock before attempting the insert
        sqlx::query("DELETE FROM trading_locks WHERE user_id = ? AND expires_at <= ?")
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Store(e.to_string()))?;

        let lock_id = new_lock_id();
        let expires_at = now + Duration::seconds(LOCK_EXPIRY_SECS);

        let result = sqlx::query(
            r#"
            INSERT INTO trading_locks (user_id, lock_id, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&lock_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Store(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(LockError::Held {
                user_id: user_id.to_string(),
            });
        }

        debug!(user_id = %user_id, lock_id = %lock_id, "Trading lock acquired");
        Ok(LockHandle {
            user_id: user_id.to_string(),
            lock_id,
        })
    }

    /// Release a held lock. A no-op when the row has already expired and
    /// been reclaimed by another cycle; never removes a lock with a
    /// different id.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        let result = sqlx::query("DELETE FROM trading_locks WHERE user_id = ? AND lock_id = ?")
            .bind(&handle.user_id)
            .bind(&handle.lock_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Store(e.to_string()))?;

        if result.rows_affected() == 0 {
            warn!(
                user_id = %handle.user_id,
                lock_id = %handle.lock_id,
                "Release found no matching lock row"
            );
        } else {
            debug!(user_id = %handle.user_id, "Trading lock released");
        }
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<TradingLockRecord>, LockError> {
        sqlx::query_as::<_, TradingLockRecord>("SELECT * FROM trading_locks WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LockError::Store(e.to_string()))
    }
}

fn new_lock_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
