//! Pre-trade risk validation.
//!
//! Runs between the decision provider and the order executor: a decision
//! that would violate a configured limit is downgraded to HOLD with the
//! reason recorded, never silently dropped and never partially executed.

use crate::domain::entities::decision::TradeDecision;

/// The per-user limits from BotConfig that gate entries.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_leverage: u32,
    /// Ceiling on position notional as a fraction of account value.
    pub max_position_size_pct: f64,
    /// Daily realized-loss ceiling in account currency, positive number.
    pub daily_loss_limit: f64,
    pub min_account_value: f64,
}

/// Account state at validation time.
#[derive(Debug, Clone, Copy)]
pub struct AccountSnapshot {
    pub account_value: f64,
    /// Sum of today's closed-trade PnL; negative when losing.
    pub daily_realized_pnl: f64,
}

/// What the orchestrator intends to submit if validation passes.
#[derive(Debug, Clone, Copy)]
pub struct ProposedEntry {
    pub leverage: u32,
    pub notional_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskVerdict {
    Approved,
    /// The decision is replaced with HOLD; the reason goes into the cycle
    /// record.
    Downgraded { reason: String },
}

pub fn validate_entry(
    decision: TradeDecision,
    proposed: &ProposedEntry,
    limits: &RiskLimits,
    account: &AccountSnapshot,
) -> RiskVerdict {
    if !decision.is_entry() {
        return RiskVerdict::Approved;
    }

    if account.account_value < limits.min_account_value {
        return RiskVerdict::Downgraded {
            reason: format!(
                "account value {:.2} below minimum {:.2}",
                account.account_value, limits.min_account_value
            ),
        };
    }

    if account.daily_realized_pnl <= -limits.daily_loss_limit {
        return RiskVerdict::Downgraded {
            reason: format!(
                "daily loss {:.2} reached limit {:.2}",
                -account.daily_realized_pnl, limits.daily_loss_limit
            ),
        };
    }

    if proposed.leverage > limits.max_leverage {
        return RiskVerdict::Downgraded {
            reason: format!(
                "requested leverage {}x exceeds ceiling {}x",
                proposed.leverage, limits.max_leverage
            ),
        };
    }

    let max_notional = account.account_value * limits.max_position_size_pct;
    if proposed.notional_usd > max_notional {
        return RiskVerdict::Downgraded {
            reason: format!(
                "position notional {:.2} exceeds ceiling {:.2} ({:.0}% of account)",
                proposed.notional_usd,
                max_notional,
                limits.max_position_size_pct * 100.0
            ),
        };
    }

    RiskVerdict::Approved
}
