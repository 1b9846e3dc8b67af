use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that increases exposure in this direction.
    pub fn entry_is_buy(&self) -> bool {
        matches!(self, PositionSide::Long)
    }

    /// Side of the order that reduces exposure (closes or protects).
    pub fn exit_is_buy(&self) -> bool {
        matches!(self, PositionSide::Short)
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side: {}", other)),
        }
    }
}

/// An open exposure as reported by the exchange's clearinghouse state.
///
/// The persisted counterpart lives in `persistence::models::PositionRecord`;
/// this type carries what the exchange itself knows about the position.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub liquidation_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub return_on_equity: f64,
}

impl ExchangePosition {
    /// Build from a signed size (`szi`): positive is long, negative short.
    /// Returns `None` for a zero size, which the exchange reports for
    /// just-closed positions.
    pub fn from_signed_size(
        symbol: String,
        szi: f64,
        entry_price: f64,
        leverage: u32,
        liquidation_price: Option<f64>,
        unrealized_pnl: f64,
        return_on_equity: f64,
    ) -> Option<Self> {
        if szi == 0.0 {
            return None;
        }
        let side = if szi > 0.0 {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        Some(ExchangePosition {
            symbol,
            side,
            size: szi.abs(),
            entry_price,
            leverage,
            liquidation_price,
            unrealized_pnl,
            return_on_equity,
        })
    }
}
