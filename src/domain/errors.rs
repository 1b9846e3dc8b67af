use thiserror::Error;

/// Errors from the exchange protocol client and order executor.
///
/// The retry policy lives in the client: `Transient` conditions
/// (timeouts, 429/502/503/504) are retried with backoff and surface as
/// `Unreachable` once the attempt budget is exhausted. Everything else is
/// terminal and returned immediately.
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("exchange unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// The exchange explicitly refused an order. Never retried: a rejection
    /// means a parameter problem that retrying unchanged will not fix.
    #[error("order rejected by exchange: {0}")]
    Rejected(String),

    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("no price available for {0}")]
    PriceUnavailable(String),

    #[error("malformed exchange response: {0}")]
    MalformedResponse(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("signing error: {0}")]
    Signing(String),
}

impl ExchangeError {
    /// Whether the underlying condition is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unreachable { .. }
                | ExchangeError::Http {
                    status: 429 | 502 | 503 | 504,
                    ..
                }
        )
    }
}

/// Errors from the per-user trading lock store.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another cycle holds the lock. Expected under scheduler overlap;
    /// callers skip the cycle rather than treating this as a failure.
    #[error("trading lock already held for user {user_id}")]
    Held { user_id: String },

    #[error("lock store error: {0}")]
    Store(String),
}

/// Errors from a single trading-cycle run.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("database error: {0}")]
    Database(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("market data unavailable: {0}")]
    MarketData(String),

    #[error("decision provider failed: {0}")]
    Decision(String),
}

impl From<crate::persistence::DatabaseError> for CycleError {
    fn from(e: crate::persistence::DatabaseError) -> Self {
        CycleError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ExchangeError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(ExchangeError::Unreachable {
            attempts: 3,
            last: "timeout".into()
        }
        .is_transient());
        assert!(!ExchangeError::Http {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ExchangeError::Rejected("bad tick".into()).is_transient());
    }
}
