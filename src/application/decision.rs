//! Decision Provider
//!
//! Seam between the trading cycle and the AI collaborator. The orchestrator
//! hands over market context and gets back an opaque decision string plus
//! reasoning; parsing and coercion to the fixed vocabulary happen on the
//! orchestrator side.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::domain::entities::decision::DecisionOutcome;
use crate::domain::entities::position::ExchangePosition;
use crate::domain::services::indicators::IndicatorSnapshot;

const DECISION_TIMEOUT: Duration = Duration::from_secs(60);

/// Market context for one (user, symbol) decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub user_id: String,
    pub symbol: String,
    /// Model name from the user's bot configuration.
    pub model: String,
    pub mid_price: f64,
    pub account_value: f64,
    pub indicators: IndicatorSnapshot,
    /// The open exchange position on this symbol, if any.
    pub position: Option<ExchangePosition>,
}

#[derive(Debug, thiserror::Error)]
#[error("decision provider error: {0}")]
pub struct DecisionError(pub String);

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError>;
}

/// Delegates the decision to an external HTTP service holding the model and
/// prompt logic. The request body is the full [`DecisionRequest`]; the
/// response must be a [`DecisionOutcome`].
pub struct HttpDecisionProvider {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpDecisionProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpDecisionProvider {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DecisionProvider for HttpDecisionProvider {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(DECISION_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| DecisionError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError(format!("http {}: {}", status, body)));
        }

        response
            .json::<DecisionOutcome>()
            .await
            .map_err(|e| DecisionError(format!("malformed decision response: {}", e)))
    }
}

/// Emits HOLD for every request. Used when no decision endpoint is
/// configured, which leaves the service observing and reconciling without
/// ever opening or closing positions.
pub struct HoldProvider;

#[async_trait]
impl DecisionProvider for HoldProvider {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError> {
        Ok(DecisionOutcome {
            decision: "HOLD".to_string(),
            reasoning: "no decision endpoint configured".to_string(),
            confidence: 1.0,
        })
    }
}
