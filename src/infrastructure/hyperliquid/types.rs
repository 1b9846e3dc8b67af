//! Wire types for the Hyperliquid /info and /exchange endpoints and the
//! candle WebSocket feed. Prices and sizes travel as strings on the wire;
//! the parsed domain values are produced by the client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::ExchangeError;

/// `{"type": "allMids"}` response: symbol to mid-price string.
pub type AllMids = HashMap<String, String>;

/// One asset in the exchange universe (`metaAndAssetCtxs` first element).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub universe: Vec<AssetMeta>,
}

/// Per-asset market context (`metaAndAssetCtxs` second element). Only the
/// fields the core consumes are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    #[serde(default)]
    pub mark_px: Option<String>,
    #[serde(default)]
    pub mid_px: Option<String>,
    #[serde(default)]
    pub funding: Option<String>,
    #[serde(default)]
    pub open_interest: Option<String>,
}

/// The `metaAndAssetCtxs` response is a two-element array.
pub type MetaAndAssetCtxs = (Universe, Vec<AssetCtx>);

/// Resolved per-symbol metadata served from the cache.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub asset_id: u32,
    pub sz_decimals: u32,
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    #[serde(default)]
    pub total_margin_used: Option<String>,
    #[serde(default)]
    pub total_ntl_pos: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub coin: String,
    /// Signed size: positive long, negative short.
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    pub leverage: LeverageInfo,
    #[serde(default)]
    pub liquidation_px: Option<String>,
    #[serde(default)]
    pub unrealized_pnl: Option<String>,
    #[serde(default)]
    pub return_on_equity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPosition {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub position: RawPosition,
}

/// `{"type": "clearinghouseState", "user": address}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
}

/// One open order from `openOrders` / `frontendOpenOrders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub coin: String,
    pub oid: u64,
    /// "B" bid / "A" ask.
    pub side: String,
    pub limit_px: String,
    pub sz: String,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub reduce_only: Option<bool>,
}

// ---- order submission ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitTif {
    pub tif: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    pub is_market: bool,
    pub trigger_px: String,
    pub tpsl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit(LimitTif),
    Trigger(TriggerSpec),
}

/// One order in the `{"orders": [...]}` action, in wire field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWire {
    /// Asset id.
    pub a: u32,
    /// Is buy.
    pub b: bool,
    /// Price string.
    pub p: String,
    /// Size string.
    pub s: String,
    /// Reduce only.
    pub r: bool,
    /// Order type.
    pub t: OrderKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledStatus {
    pub oid: u64,
    #[serde(default)]
    pub total_sz: Option<String>,
    #[serde(default)]
    pub avg_px: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestingStatus {
    pub oid: u64,
}

/// One entry of `response.data.statuses[]` in an order/cancel ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusEntry {
    Filled(FilledStatus),
    Resting(RestingStatus),
    Error(String),
    Success(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub statuses: Vec<OrderStatusEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<StatusData>,
}

/// Top-level /exchange acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeAck {
    pub status: String,
    #[serde(default)]
    pub response: Option<AckBody>,
}

impl ExchangeAck {
    /// The per-order status entries, or a malformed-response error when the
    /// ack carries none. Absence of a status entry is treated as a hard
    /// failure: the order may not exist on the exchange.
    pub fn statuses(&self) -> Result<&[OrderStatusEntry], ExchangeError> {
        if self.status != "ok" {
            return Err(ExchangeError::Rejected(self.status.clone()));
        }
        self.response
            .as_ref()
            .and_then(|b| b.data.as_ref())
            .map(|d| d.statuses.as_slice())
            .ok_or_else(|| {
                ExchangeError::MalformedResponse("exchange ack carried no statuses".into())
            })
    }
}

/// One candle pushed over the WebSocket feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsCandle {
    /// Open time, epoch milliseconds.
    pub t: u64,
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
}

/// Parse a wire decimal string; malformed values become a protocol error
/// rather than a NaN that poisons downstream math.
pub fn parse_px(raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::MalformedResponse(format!("bad decimal: {:?}", raw)))
}

/// Optional variant of [`parse_px`] for fields absent on some assets.
pub fn parse_px_opt(raw: &Option<String>) -> Result<Option<f64>, ExchangeError> {
    raw.as_deref().map(parse_px).transpose()
}
