//! Order executor: translates trading decisions into signed exchange
//! orders with the correct sign conventions and safety flags.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::LocalWallet;
use tracing::{info, warn};

use super::client::HyperliquidClient;
use super::types::*;
use crate::domain::entities::position::PositionSide;
use crate::domain::errors::ExchangeError;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

/// Slippage tolerance applied to reduce-only closes, as a fraction of mid.
pub const CLOSE_SLIPPAGE: f64 = 0.03;

/// Settle delay between cancelling standing orders and re-reading the
/// position during a nuclear close.
const CANCEL_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Price strings carry at most five significant figures.
const PRICE_SIG_FIGS: i32 = 5;

/// Terminal classification of one submitted order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacedOrder {
    Filled { oid: u64, avg_px: Option<f64> },
    Resting { oid: u64 },
}

impl PlacedOrder {
    pub fn oid(&self) -> u64 {
        match self {
            PlacedOrder::Filled { oid, .. } | PlacedOrder::Resting { oid } => *oid,
        }
    }
}

/// Outcome of the cancel-then-close recovery procedure. `NoPosition` and
/// `ZeroSize` are both success sentinels; they are reported distinctly and
/// no mutual exclusivity is assumed.
#[derive(Debug, Clone, PartialEq)]
pub enum NuclearCloseOutcome {
    NoPosition { cancelled: u32 },
    ZeroSize { cancelled: u32 },
    Closed { cancelled: u32, close: PlacedOrder },
}

pub struct OrderExecutor {
    client: Arc<HyperliquidClient>,
}

impl OrderExecutor {
    pub fn new(client: Arc<HyperliquidClient>) -> Self {
        OrderExecutor { client }
    }

    pub fn client(&self) -> &HyperliquidClient {
        &self.client
    }

    /// Place a limit order. `price` defaults to the current mid when absent.
    /// The result is classified from the response's order-status payload;
    /// an `error` status is a hard `Rejected` failure, not a silent no-op.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        is_buy: bool,
        size: Quantity,
        price: Option<Price>,
        testnet: bool,
        reduce_only: bool,
        tif: &str,
    ) -> Result<PlacedOrder, ExchangeError> {
        let asset = self.client.get_asset_info(symbol, testnet).await?;
        let raw_price = match price {
            Some(p) => p.value(),
            None => self.client.get_market_price(symbol, testnet).await?,
        };
        let px = round_to_significant(raw_price, PRICE_SIG_FIGS);
        let sz = round_to_decimals(size.value(), asset.sz_decimals);
        if sz <= 0.0 {
            return Err(ExchangeError::Rejected(format!(
                "size {} rounds to zero at {} decimals",
                size.value(),
                asset.sz_decimals
            )));
        }

        let order = OrderWire {
            a: asset.asset_id,
            b: is_buy,
            p: format_decimal(px),
            s: format_decimal(sz),
            r: reduce_only,
            t: OrderKind::Limit(LimitTif {
                tif: tif.to_string(),
            }),
        };
        let action = serde_json::json!({
            "type": "order",
            "orders": [order],
            "grouping": "na",
        });

        let ack = self.client.exchange(wallet, action, testnet).await?;
        let placed = classify_single(&ack)?;
        info!(symbol, is_buy, px, sz, reduce_only, ?placed, "order placed");
        Ok(placed)
    }

    /// Reduce-only stop-loss trigger, sell to protect a long and buy to
    /// protect a short, sized at the position level so later size changes
    /// track automatically.
    pub async fn place_stop_loss(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        side: PositionSide,
        size: Quantity,
        trigger_price: Price,
        testnet: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        self.place_trigger(wallet, symbol, side, size, trigger_price, "sl", testnet)
            .await
    }

    /// Reduce-only take-profit trigger, opposite side of the position.
    pub async fn place_take_profit(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        side: PositionSide,
        size: Quantity,
        trigger_price: Price,
        testnet: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        self.place_trigger(wallet, symbol, side, size, trigger_price, "tp", testnet)
            .await
    }

    async fn place_trigger(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        side: PositionSide,
        size: Quantity,
        trigger_price: Price,
        tpsl: &str,
        testnet: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        let asset = self.client.get_asset_info(symbol, testnet).await?;
        let px = round_to_significant(trigger_price.value(), PRICE_SIG_FIGS);
        let sz = round_to_decimals(size.value(), asset.sz_decimals);

        let order = OrderWire {
            a: asset.asset_id,
            // Trigger side is the opposite of the position side.
            b: side.exit_is_buy(),
            p: format_decimal(px),
            s: format_decimal(sz),
            r: true,
            t: OrderKind::Trigger(TriggerSpec {
                is_market: true,
                trigger_px: format_decimal(px),
                tpsl: tpsl.to_string(),
            }),
        };
        let action = serde_json::json!({
            "type": "order",
            "orders": [order],
            "grouping": "positionTpsl",
        });

        let ack = self.client.exchange(wallet, action, testnet).await?;
        let placed = classify_single(&ack)?;
        info!(symbol, %side, tpsl, px, ?placed, "trigger order placed");
        Ok(placed)
    }

    /// Reduce-only close at a slippage-adjusted limit price: above mid when
    /// buying back a short, below mid when selling out of a long, so the
    /// order is immediately marketable. GTC keeps it resting through thin
    /// liquidity instead of cancelling.
    pub async fn close_position(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        size: Quantity,
        mid: Price,
        is_buy: bool,
        testnet: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        let limit = slippage_price(mid.value(), is_buy, CLOSE_SLIPPAGE);
        let price = Price::new(limit).map_err(ExchangeError::MalformedResponse)?;
        self.place_order(wallet, symbol, is_buy, size, Some(price), testnet, true, "Gtc")
            .await
    }

    /// Cancel every open order for a symbol in one batched request.
    /// Returns the number cancelled; zero is a valid, non-error outcome.
    /// The order list is an authoritative read: a failed list raises
    /// instead of being treated as an empty book.
    pub async fn cancel_all_orders_for_symbol(
        &self,
        wallet: &LocalWallet,
        address: &str,
        symbol: &str,
        testnet: bool,
    ) -> Result<u32, ExchangeError> {
        let open = self
            .client
            .get_frontend_open_orders_strict(address, testnet)
            .await?;
        let oids: Vec<u64> = open
            .iter()
            .filter(|o| o.coin == symbol)
            .map(|o| o.oid)
            .collect();
        if oids.is_empty() {
            return Ok(0);
        }

        let asset = self.client.get_asset_info(symbol, testnet).await?;
        let cancels: Vec<serde_json::Value> = oids
            .iter()
            .map(|oid| serde_json::json!({"a": asset.asset_id, "o": oid}))
            .collect();
        let action = serde_json::json!({"type": "cancel", "cancels": cancels});

        let ack = self.client.exchange(wallet, action, testnet).await?;
        for status in ack.statuses()? {
            if let OrderStatusEntry::Error(msg) = status {
                warn!(symbol, error = %msg, "cancel entry failed");
            }
        }
        info!(symbol, count = oids.len(), "cancelled open orders");
        Ok(oids.len() as u32)
    }

    /// Recovery procedure for when standing TP/SL orders block a normal
    /// close: cancel everything for the symbol, let the cancellations
    /// settle, re-read the position, and close whatever remains. Each
    /// step's outcome is returned for auditing.
    pub async fn nuclear_close_position(
        &self,
        wallet: &LocalWallet,
        address: &str,
        symbol: &str,
        testnet: bool,
    ) -> Result<NuclearCloseOutcome, ExchangeError> {
        let cancelled = self
            .cancel_all_orders_for_symbol(wallet, address, symbol, testnet)
            .await?;

        tokio::time::sleep(CANCEL_SETTLE_DELAY).await;

        // Authoritative read: an outage here must abort, not be read as
        // "position already gone".
        let positions = self.client.get_user_positions(address, testnet).await?;
        let position = match positions.iter().find(|p| p.symbol == symbol) {
            None => {
                info!(symbol, cancelled, "nuclear close: no position remains");
                return Ok(NuclearCloseOutcome::NoPosition { cancelled });
            }
            Some(p) => p,
        };
        if position.size == 0.0 {
            info!(symbol, cancelled, "nuclear close: zero-size position");
            return Ok(NuclearCloseOutcome::ZeroSize { cancelled });
        }

        let mid = self.client.get_market_price(symbol, testnet).await?;
        let size = Quantity::new(position.size).map_err(ExchangeError::MalformedResponse)?;
        let mid = Price::new(mid).map_err(ExchangeError::MalformedResponse)?;
        let close = self
            .close_position(wallet, symbol, size, mid, position.side.exit_is_buy(), testnet)
            .await?;

        info!(symbol, cancelled, ?close, "nuclear close completed");
        Ok(NuclearCloseOutcome::Closed { cancelled, close })
    }
}

/// Classify the single order status in an ack. A missing entry means the
/// order may not exist on the exchange and is a hard failure.
fn classify_single(ack: &ExchangeAck) -> Result<PlacedOrder, ExchangeError> {
    let statuses = ack.statuses()?;
    match statuses.first() {
        Some(OrderStatusEntry::Filled(filled)) => Ok(PlacedOrder::Filled {
            oid: filled.oid,
            avg_px: filled
                .avg_px
                .as_deref()
                .and_then(|raw| raw.parse::<f64>().ok()),
        }),
        Some(OrderStatusEntry::Resting(resting)) => Ok(PlacedOrder::Resting { oid: resting.oid }),
        Some(OrderStatusEntry::Error(msg)) => Err(ExchangeError::Rejected(msg.clone())),
        Some(OrderStatusEntry::Success(_)) | None => Err(ExchangeError::MalformedResponse(
            "order ack carried no order status".into(),
        )),
    }
}

/// Slippage-adjusted close price, shifted toward immediate execution by
/// `tolerance` of mid: up for buys, down for sells.
pub fn slippage_price(mid: f64, is_buy: bool, tolerance: f64) -> f64 {
    let factor = if is_buy {
        1.0 + tolerance
    } else {
        1.0 - tolerance
    };
    round_to_significant(mid * factor, PRICE_SIG_FIGS)
}

/// Round to at most `figures` significant figures.
pub fn round_to_significant(value: f64, figures: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return 0.0;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let scale = 10f64.powi(figures - 1 - magnitude);
    (value * scale).round() / scale
}

/// Round a size to the asset's size-decimal precision.
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// Render a rounded decimal without scientific notation or trailing zeros.
pub fn format_decimal(value: f64) -> String {
    let mut s = format!("{:.8}", value);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}
