//! Position Reconciler
//!
//! Periodic sweep that brings local position rows back in line with the
//! exchange. The exchange is the source of truth: rows with no exchange
//! counterpart (filled stop, liquidation, manual close) are deleted. The
//! reconciler never creates positions and a user whose authoritative read
//! fails is skipped, never treated as flat.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::infrastructure::hyperliquid::client::HyperliquidClient;
use crate::persistence::repository::{BotConfigRepository, PositionRepository};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub users_checked: u32,
    /// Users whose exchange read failed and were left untouched.
    pub users_skipped: u32,
    pub rows_deleted: u32,
}

pub struct PositionReconciler {
    client: Arc<HyperliquidClient>,
    configs: BotConfigRepository,
    positions: PositionRepository,
}

impl PositionReconciler {
    pub fn new(
        client: Arc<HyperliquidClient>,
        configs: BotConfigRepository,
        positions: PositionRepository,
    ) -> Self {
        PositionReconciler {
            client,
            configs,
            positions,
        }
    }

    /// One reconciliation pass over all active users. Idempotent, and safe
    /// to interleave with trading cycles: a row deleted just as a cycle
    /// persists it reappears on the next pass.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let configs = match self.configs.get_active().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "reconciler could not list active configs");
                return report;
            }
        };

        for config in configs {
            report.users_checked += 1;

            let exchange_positions = match self
                .client
                .get_user_positions(&config.wallet_address, config.testnet)
                .await
            {
                Ok(positions) => positions,
                Err(e) => {
                    // Unknown state, not empty state. Touch nothing.
                    warn!(user_id = %config.user_id, error = %e,
                        "authoritative read failed, skipping user");
                    report.users_skipped += 1;
                    continue;
                }
            };

            let stored = match self.positions.get_by_user(&config.user_id).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(user_id = %config.user_id, error = %e,
                        "stored position read failed, skipping user");
                    report.users_skipped += 1;
                    continue;
                }
            };

            for row in stored {
                let on_exchange = exchange_positions.iter().any(|p| p.symbol == row.symbol);
                if on_exchange {
                    continue;
                }
                match self.positions.delete(&config.user_id, &row.symbol).await {
                    Ok(true) => {
                        info!(user_id = %config.user_id, symbol = %row.symbol,
                            "deleted stale position row with no exchange counterpart");
                        report.rows_deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(user_id = %config.user_id, symbol = %row.symbol, error = %e,
                            "stale position delete failed");
                    }
                }
            }
        }

        debug!(
            checked = report.users_checked,
            skipped = report.users_skipped,
            deleted = report.rows_deleted,
            "reconciliation pass complete"
        );
        report
    }
}
