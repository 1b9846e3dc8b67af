use serde::{Deserialize, Serialize};

/// The fixed decision vocabulary the orchestrator accepts from the AI
/// collaborator. Anything outside it is coerced to `Hold` by `coerce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDecision {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl TradeDecision {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN_LONG" => Some(TradeDecision::OpenLong),
            "OPEN_SHORT" => Some(TradeDecision::OpenShort),
            "CLOSE" => Some(TradeDecision::Close),
            "HOLD" => Some(TradeDecision::Hold),
            _ => None,
        }
    }

    /// Parse with the fallback the cycle requires: an unrecognised value is
    /// a `Hold`, and the caller logs the coercion.
    pub fn coerce(raw: &str) -> (Self, bool) {
        match Self::parse(raw) {
            Some(d) => (d, false),
            None => (TradeDecision::Hold, true),
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, TradeDecision::OpenLong | TradeDecision::OpenShort)
    }
}

impl std::fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeDecision::OpenLong => "OPEN_LONG",
            TradeDecision::OpenShort => "OPEN_SHORT",
            TradeDecision::Close => "CLOSE",
            TradeDecision::Hold => "HOLD",
        };
        write!(f, "{}", s)
    }
}

/// What the decision provider returns: an opaque decision value plus the
/// reasoning text and confidence that go into the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decision: String,
    pub reasoning: String,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(
            TradeDecision::parse("OPEN_LONG"),
            Some(TradeDecision::OpenLong)
        );
        assert_eq!(
            TradeDecision::parse(" open_short "),
            Some(TradeDecision::OpenShort)
        );
        assert_eq!(TradeDecision::parse("close"), Some(TradeDecision::Close));
        assert_eq!(TradeDecision::parse("HOLD"), Some(TradeDecision::Hold));
        assert_eq!(TradeDecision::parse("BUY_THE_DIP"), None);
    }

    #[test]
    fn test_coerce_unknown_to_hold() {
        let (decision, coerced) = TradeDecision::coerce("YOLO");
        assert_eq!(decision, TradeDecision::Hold);
        assert!(coerced);

        let (decision, coerced) = TradeDecision::coerce("CLOSE");
        assert_eq!(decision, TradeDecision::Close);
        assert!(!coerced);
    }
}
