//! Trading Cycle Orchestrator
//!
//! One cycle per (user, run): acquire the user's trading lock, fetch the
//! authoritative account state, build indicators from live candles, ask the
//! decision provider, validate risk, execute, persist, release the lock.
//! The lock is released on every path; a held lock means another cycle is
//! in flight and the run is silently skipped.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::entities::decision::TradeDecision;
use crate::domain::entities::position::{ExchangePosition, PositionSide};
use crate::domain::errors::{CycleError, ExchangeError, LockError};
use crate::domain::services::indicators::{Candle, IndicatorSnapshot, INSUFFICIENT_DATA};
use crate::domain::services::risk::{
    validate_entry, AccountSnapshot, ProposedEntry, RiskLimits, RiskVerdict,
};
use crate::domain::value_objects::{Price, Quantity};
use crate::infrastructure::hyperliquid::executor::{NuclearCloseOutcome, OrderExecutor, PlacedOrder};
use crate::infrastructure::hyperliquid::signer::wallet_from_key;
use crate::infrastructure::hyperliquid::ws;
use crate::persistence::lock::TradingLockStore;
use crate::persistence::models::{BotConfigRecord, CreatePosition, CreateTrade};
use crate::persistence::repository::{PositionRepository, TradeRepository};

use super::decision::{DecisionProvider, DecisionRequest};

/// Candle window handed to the indicator engine. 60 five-minute bars cover
/// the 4-hour percent-change lookback with headroom.
pub const CANDLE_TARGET: usize = 60;
const CANDLE_INTERVAL: &str = "5m";
const CANDLE_DEADLINE: Duration = Duration::from_secs(30);

/// Stop distance in ATR multiples below/above entry.
const STOP_ATR_MULT: f64 = 2.0;
/// Take-profit distance in ATR multiples.
const TAKE_PROFIT_ATR_MULT: f64 = 3.0;

/// Candle feed seam. The live implementation collects from the exchange
/// WebSocket; tests substitute a canned series.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn candles(
        &self,
        symbol: &str,
        target: usize,
        testnet: bool,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

pub struct WsCandleSource;

#[async_trait]
impl MarketDataSource for WsCandleSource {
    async fn candles(
        &self,
        symbol: &str,
        target: usize,
        testnet: bool,
    ) -> Result<Vec<Candle>, ExchangeError> {
        ws::collect_candles(symbol, CANDLE_INTERVAL, target, CANDLE_DEADLINE, testnet).await
    }
}

/// What happened for one symbol in one cycle.
#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub symbol: String,
    pub decision: TradeDecision,
    /// The provider's raw output fell outside the vocabulary and was
    /// coerced to HOLD.
    pub coerced: bool,
    pub risk_downgrade: Option<String>,
    pub executed: bool,
    pub error: Option<String>,
}

/// Outcome of a full user cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub user_id: String,
    /// The lock was held by another cycle and this run did nothing.
    pub skipped_lock_held: bool,
    pub symbols: Vec<SymbolReport>,
}

impl CycleReport {
    fn skipped(user_id: &str) -> Self {
        CycleReport {
            user_id: user_id.to_string(),
            skipped_lock_held: true,
            symbols: Vec::new(),
        }
    }
}

pub struct TradingCycleOrchestrator {
    executor: Arc<OrderExecutor>,
    locks: TradingLockStore,
    positions: PositionRepository,
    trades: TradeRepository,
    market_data: Arc<dyn MarketDataSource>,
    provider: Arc<dyn DecisionProvider>,
    candle_target: usize,
}

impl TradingCycleOrchestrator {
    pub fn new(
        executor: Arc<OrderExecutor>,
        locks: TradingLockStore,
        positions: PositionRepository,
        trades: TradeRepository,
        market_data: Arc<dyn MarketDataSource>,
        provider: Arc<dyn DecisionProvider>,
    ) -> Self {
        TradingCycleOrchestrator {
            executor,
            locks,
            positions,
            trades,
            market_data,
            provider,
            candle_target: CANDLE_TARGET,
        }
    }

    /// Override the candle window size.
    pub fn with_candle_target(mut self, target: usize) -> Self {
        self.candle_target = target;
        self
    }

    /// Run one trading cycle for a user. Holds the user's trading lock for
    /// the duration; a held lock skips the run without error.
    pub async fn run_cycle(&self, config: &BotConfigRecord) -> Result<CycleReport, CycleError> {
        let handle = match self.locks.acquire(&config.user_id).await {
            Ok(handle) => handle,
            Err(LockError::Held { .. }) => {
                debug!(user_id = %config.user_id, "trading lock held, skipping cycle");
                return Ok(CycleReport::skipped(&config.user_id));
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.run_locked(config).await;

        // Release on every path. A release failure is logged, not raised:
        // the 120 s expiry reclaims the row regardless.
        if let Err(e) = self.locks.release(&handle).await {
            warn!(user_id = %config.user_id, error = %e, "lock release failed");
        }
        result
    }

    async fn run_locked(&self, config: &BotConfigRecord) -> Result<CycleReport, CycleError> {
        let wallet = wallet_from_key(&config.wallet_key)?;
        let address = config.wallet_address.as_str();
        let testnet = config.testnet;
        let client = self.executor.client();

        // Authoritative account reads. Any failure here aborts the cycle
        // before a decision is requested.
        let account_value = client.get_account_value(address, testnet).await?;
        let exchange_positions = client.get_user_positions(address, testnet).await?;

        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        let daily_pnl = self
            .trades
            .realized_pnl_since(&config.user_id, midnight)
            .await?;

        self.refresh_stored_prices(config, &exchange_positions, testnet)
            .await;

        let limits = RiskLimits {
            max_leverage: config.max_leverage as u32,
            max_position_size_pct: config.max_position_size_pct,
            daily_loss_limit: config.daily_loss_limit,
            min_account_value: config.min_account_value,
        };
        let account = AccountSnapshot {
            account_value,
            daily_realized_pnl: daily_pnl,
        };

        let mut report = CycleReport {
            user_id: config.user_id.clone(),
            skipped_lock_held: false,
            symbols: Vec::new(),
        };

        for symbol in config.symbol_list() {
            let candles = self
                .market_data
                .candles(&symbol, self.candle_target, testnet)
                .await
                .map_err(|e| CycleError::MarketData(format!("{}: {}", symbol, e)))?;
            let indicators = IndicatorSnapshot::from_candles(&candles);
            let mid = client.get_market_price(&symbol, testnet).await?;
            let position = exchange_positions
                .iter()
                .find(|p| p.symbol == symbol)
                .cloned();

            let request = DecisionRequest {
                user_id: config.user_id.clone(),
                symbol: symbol.clone(),
                model: config.model.clone(),
                mid_price: mid,
                account_value,
                indicators: indicators.clone(),
                position: position.clone(),
            };

            let outcome = match self.provider.decide(&request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(user_id = %config.user_id, symbol = %symbol, error = %e,
                        "decision provider failed, skipping symbol");
                    report.symbols.push(SymbolReport {
                        symbol,
                        decision: TradeDecision::Hold,
                        coerced: false,
                        risk_downgrade: None,
                        executed: false,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let (mut decision, coerced) = TradeDecision::coerce(&outcome.decision);
            if coerced {
                warn!(user_id = %config.user_id, symbol = %symbol, raw = %outcome.decision,
                    "decision outside vocabulary, coerced to HOLD");
            }

            // Entries never stack onto an existing position on the symbol
            if decision.is_entry() && position.is_some() {
                debug!(user_id = %config.user_id, symbol = %symbol,
                    "position already open, entry reduced to HOLD");
                decision = TradeDecision::Hold;
            }

            let notional = account_value * config.max_position_size_pct;
            let proposed = ProposedEntry {
                leverage: limits.max_leverage,
                notional_usd: notional,
            };
            let mut risk_downgrade = None;
            if let RiskVerdict::Downgraded { reason } =
                validate_entry(decision, &proposed, &limits, &account)
            {
                info!(user_id = %config.user_id, symbol = %symbol, reason = %reason,
                    "entry downgraded to HOLD");
                risk_downgrade = Some(reason);
                decision = TradeDecision::Hold;
            }

            let mut entry = SymbolReport {
                symbol: symbol.clone(),
                decision,
                coerced,
                risk_downgrade,
                executed: false,
                error: None,
            };

            match decision {
                TradeDecision::Hold => {}
                TradeDecision::OpenLong | TradeDecision::OpenShort => {
                    let side = if decision == TradeDecision::OpenLong {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    };
                    match self
                        .execute_entry(
                            config, &wallet, &symbol, side, mid, notional, &indicators, &outcome,
                        )
                        .await
                    {
                        Ok(()) => entry.executed = true,
                        Err(e) => {
                            warn!(user_id = %config.user_id, symbol = %symbol, error = %e,
                                "entry execution failed");
                            entry.error = Some(e.to_string());
                        }
                    }
                }
                TradeDecision::Close => match position {
                    Some(open) => match self
                        .execute_close(config, &wallet, address, &symbol, &open, &outcome)
                        .await
                    {
                        Ok(()) => entry.executed = true,
                        Err(e) => {
                            warn!(user_id = %config.user_id, symbol = %symbol, error = %e,
                                "close execution failed");
                            entry.error = Some(e.to_string());
                        }
                    },
                    None => {
                        debug!(user_id = %config.user_id, symbol = %symbol,
                            "CLOSE with no open position, nothing to do");
                    }
                },
            }

            report.symbols.push(entry);
        }

        Ok(report)
    }

    /// Refresh mark price and pnl on stored rows from the authoritative
    /// exchange view. Best-effort: a stale row is display data only.
    async fn refresh_stored_prices(
        &self,
        config: &BotConfigRecord,
        exchange_positions: &[ExchangePosition],
        testnet: bool,
    ) {
        let stored = match self.positions.get_by_user(&config.user_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id = %config.user_id, error = %e, "stored position read failed");
                return;
            }
        };
        for row in stored {
            let Some(exch) = exchange_positions.iter().find(|p| p.symbol == row.symbol) else {
                continue;
            };
            let mid = match self
                .executor
                .client()
                .get_market_price(&row.symbol, testnet)
                .await
            {
                Ok(mid) => mid,
                Err(e) => {
                    warn!(symbol = %row.symbol, error = %e, "price refresh failed");
                    continue;
                }
            };
            if let Err(e) = self
                .positions
                .update_price(
                    &config.user_id,
                    &row.symbol,
                    mid,
                    exch.unrealized_pnl,
                    exch.return_on_equity * 100.0,
                )
                .await
            {
                warn!(symbol = %row.symbol, error = %e, "price refresh write failed");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_entry(
        &self,
        config: &BotConfigRecord,
        wallet: &ethers::signers::LocalWallet,
        symbol: &str,
        side: PositionSide,
        mid: f64,
        notional: f64,
        indicators: &IndicatorSnapshot,
        outcome: &crate::domain::entities::decision::DecisionOutcome,
    ) -> Result<(), CycleError> {
        let client = self.executor.client();
        let testnet = config.testnet;
        let leverage = config.max_leverage as u32;

        // Best-effort: trading on the exchange's current leverage is safer
        // than dropping a live decision.
        if let Err(e) = client.set_leverage(wallet, symbol, leverage, testnet).await {
            warn!(symbol, leverage, error = %e, "set_leverage failed, continuing");
        }

        let raw_size = notional / mid;
        let size = Quantity::new(raw_size).map_err(CycleError::MarketData)?;
        let price = Price::new(mid).map_err(CycleError::MarketData)?;

        let placed = match self
            .executor
            .place_order(
                wallet,
                symbol,
                side.entry_is_buy(),
                size,
                Some(price),
                testnet,
                false,
                "Gtc",
            )
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                self.record_trade_failure(config, symbol, "open", side, raw_size, mid, outcome)
                    .await;
                return Err(e.into());
            }
        };

        let entry_price = match &placed {
            PlacedOrder::Filled { avg_px: Some(px), .. } => *px,
            _ => mid,
        };
        let (stop_loss, take_profit) =
            match protective_prices(side, entry_price, indicators.atr_14) {
                Some((sl, tp)) => (Some(sl), Some(tp)),
                None => (None, None),
            };

        let mut sl_oid = None;
        let mut tp_oid = None;
        if let (Some(sl), Some(tp)) = (stop_loss, take_profit) {
            match Price::new(sl) {
                Ok(trigger) => match self
                    .executor
                    .place_stop_loss(wallet, symbol, side, size, trigger, testnet)
                    .await
                {
                    Ok(order) => sl_oid = Some(order.oid() as i64),
                    Err(e) => warn!(symbol, error = %e, "stop-loss placement failed"),
                },
                Err(e) => warn!(symbol, error = %e, "stop-loss price invalid"),
            }
            match Price::new(tp) {
                Ok(trigger) => match self
                    .executor
                    .place_take_profit(wallet, symbol, side, size, trigger, testnet)
                    .await
                {
                    Ok(order) => tp_oid = Some(order.oid() as i64),
                    Err(e) => warn!(symbol, error = %e, "take-profit placement failed"),
                },
                Err(e) => warn!(symbol, error = %e, "take-profit price invalid"),
            }
        } else {
            debug!(symbol, "insufficient ATR data, entering without protective orders");
        }

        self.positions
            .upsert(CreatePosition {
                user_id: config.user_id.clone(),
                symbol: symbol.to_string(),
                side: side.to_string(),
                size: size.value(),
                leverage: leverage as i64,
                entry_price,
                stop_loss,
                take_profit,
                entry_oid: Some(placed.oid() as i64),
                sl_oid,
                tp_oid,
            })
            .await?;

        self.trades
            .create(CreateTrade {
                user_id: config.user_id.clone(),
                symbol: symbol.to_string(),
                action: "open".to_string(),
                side: side.to_string(),
                size: size.value(),
                leverage: leverage as i64,
                price: entry_price,
                pnl: None,
                reasoning: outcome.reasoning.clone(),
                model: config.model.clone(),
                confidence: outcome.confidence,
                tx_ref: Some(placed.oid().to_string()),
            })
            .await?;

        info!(user_id = %config.user_id, symbol, %side, size = size.value(),
            entry_price, "position opened");
        Ok(())
    }

    async fn execute_close(
        &self,
        config: &BotConfigRecord,
        wallet: &ethers::signers::LocalWallet,
        address: &str,
        symbol: &str,
        position: &ExchangePosition,
        outcome: &crate::domain::entities::decision::DecisionOutcome,
    ) -> Result<(), CycleError> {
        let result = match self
            .executor
            .nuclear_close_position(wallet, address, symbol, config.testnet)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.record_trade_failure(
                    config,
                    symbol,
                    "close",
                    position.side,
                    position.size,
                    position.entry_price,
                    outcome,
                )
                .await;
                return Err(e.into());
            }
        };

        let close_ref = match &result {
            NuclearCloseOutcome::Closed { close, .. } => Some(close.oid().to_string()),
            NuclearCloseOutcome::NoPosition { .. } | NuclearCloseOutcome::ZeroSize { .. } => None,
        };

        self.trades
            .create(CreateTrade {
                user_id: config.user_id.clone(),
                symbol: symbol.to_string(),
                action: "close".to_string(),
                side: position.side.to_string(),
                size: position.size,
                leverage: position.leverage as i64,
                price: position.entry_price,
                pnl: Some(position.unrealized_pnl),
                reasoning: outcome.reasoning.clone(),
                model: config.model.clone(),
                confidence: outcome.confidence,
                tx_ref: close_ref,
            })
            .await?;

        self.positions.delete(&config.user_id, symbol).await?;

        info!(user_id = %config.user_id, symbol, ?result, "position closed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_trade_failure(
        &self,
        config: &BotConfigRecord,
        symbol: &str,
        action: &str,
        side: PositionSide,
        size: f64,
        price: f64,
        outcome: &crate::domain::entities::decision::DecisionOutcome,
    ) {
        let record = CreateTrade {
            user_id: config.user_id.clone(),
            symbol: symbol.to_string(),
            action: action.to_string(),
            side: side.to_string(),
            size,
            leverage: config.max_leverage,
            price,
            pnl: None,
            reasoning: outcome.reasoning.clone(),
            model: config.model.clone(),
            confidence: outcome.confidence,
            tx_ref: None,
        };
        if let Err(e) = self.trades.create_failed(record).await {
            warn!(user_id = %config.user_id, symbol, error = %e,
                "failed-trade ledger write failed");
        }
    }
}

/// ATR-derived protective pair: stop 2 ATR against the position, target
/// 3 ATR with it. `None` when the ATR is a sentinel or non-positive.
pub fn protective_prices(side: PositionSide, entry: f64, atr: f64) -> Option<(f64, f64)> {
    if atr <= 0.0 || atr == INSUFFICIENT_DATA {
        return None;
    }
    let (stop, target) = match side {
        PositionSide::Long => (
            entry - STOP_ATR_MULT * atr,
            entry + TAKE_PROFIT_ATR_MULT * atr,
        ),
        PositionSide::Short => (
            entry + STOP_ATR_MULT * atr,
            entry - TAKE_PROFIT_ATR_MULT * atr,
        ),
    };
    if stop <= 0.0 {
        return None;
    }
    Some((stop, target))
}
