//! REST client for the Hyperliquid info/exchange endpoints.
//!
//! All outbound calls share one resilience policy: a 15 s deadline per
//! attempt, up to three attempts for transient conditions (timeouts and
//! HTTP 429/502/503/504) with 1 s/2 s backoff between them, and immediate
//! surfacing of everything else. Reads that feed destructive decisions
//! always raise on failure; display-only reads degrade to empty results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::signer;
use super::types::*;
use crate::domain::entities::position::ExchangePosition;
use crate::domain::errors::ExchangeError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const BACKOFF_CAP: Duration = Duration::from_secs(4);
const META_CACHE_TTL: Duration = Duration::from_secs(60);

/// Seam for the inter-attempt delay, so retry tests can observe the backoff
/// schedule instead of sleeping through it.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Exchange nonces are millisecond timestamps, but consecutive submissions
/// (entry, then its SL/TP pair) can land in the same millisecond and the
/// exchange rejects a reused nonce. The counter keeps nonces strictly
/// increasing across the process while tracking the clock.
fn next_nonce() -> u64 {
    static LAST_NONCE: AtomicU64 = AtomicU64::new(0);
    let now = chrono::Utc::now().timestamp_millis() as u64;
    let prev = LAST_NONCE
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Asset universe plus market context for one network.
#[derive(Debug, Clone)]
pub struct AssetMetadata {
    pub universe: Vec<AssetMeta>,
    pub contexts: Vec<AssetCtx>,
}

struct MetaCacheEntry {
    testnet: bool,
    metadata: Arc<AssetMetadata>,
    fetched_at: Instant,
}

impl MetaCacheEntry {
    /// Fresh iff fetched for the same network within the TTL. The cache is
    /// shared across all users; user identity never enters this check.
    fn is_fresh(&self, testnet: bool, ttl: Duration) -> bool {
        self.testnet == testnet && self.fetched_at.elapsed() < ttl
    }
}

pub struct HyperliquidClient {
    http: reqwest::Client,
    base_override: Option<String>,
    max_retries: u32,
    request_timeout: Duration,
    backoff: Arc<dyn Backoff>,
    meta_cache: RwLock<Option<MetaCacheEntry>>,
    meta_ttl: Duration,
}

impl HyperliquidClient {
    pub fn new() -> Self {
        HyperliquidClient {
            http: reqwest::Client::new(),
            base_override: None,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff: Arc::new(TokioBackoff),
            meta_cache: RwLock::new(None),
            meta_ttl: META_CACHE_TTL,
        }
    }

    /// Route every call to a fixed base URL regardless of the network flag.
    /// Used by tests to point the client at a mock exchange.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_override = Some(base.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_meta_ttl(mut self, ttl: Duration) -> Self {
        self.meta_ttl = ttl;
        self
    }

    fn base_url(&self, testnet: bool) -> String {
        match &self.base_override {
            Some(base) => base.clone(),
            None => super::api_base_url(testnet).to_string(),
        }
    }

    /// POST a JSON body under the shared retry/timeout policy.
    ///
    /// Retried: per-attempt timeout, HTTP 429/502/503/504. Immediate:
    /// any other non-2xx status or a non-timeout transport error. Exhausting
    /// the attempt budget surfaces `Unreachable` with the last cause.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ExchangeError> {
        let mut last_cause = String::new();

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1)).min(BACKOFF_CAP);
                debug!(url, attempt, ?delay, "retrying exchange call");
                self.backoff.wait(delay).await;
            }

            let send = async {
                let resp = self.http.post(url).json(body).send().await?;
                let status = resp.status();
                let text = resp.text().await?;
                Ok::<_, reqwest::Error>((status, text))
            };

            match tokio::time::timeout(self.request_timeout, send).await {
                Err(_elapsed) => {
                    last_cause = format!("timeout after {:?}", self.request_timeout);
                    continue;
                }
                Ok(Err(e)) => {
                    return Err(ExchangeError::Transport(e.to_string()));
                }
                Ok(Ok((status, text))) => {
                    if status.is_success() {
                        return serde_json::from_str(&text).map_err(|e| {
                            ExchangeError::MalformedResponse(format!("{}: {}", url, e))
                        });
                    }
                    let code = status.as_u16();
                    if matches!(code, 429 | 502 | 503 | 504) {
                        last_cause = format!("http {}", code);
                        continue;
                    }
                    return Err(ExchangeError::Http {
                        status: code,
                        body: text,
                    });
                }
            }
        }

        Err(ExchangeError::Unreachable {
            attempts: self.max_retries,
            last: last_cause,
        })
    }

    async fn info(
        &self,
        testnet: bool,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}/info", self.base_url(testnet));
        self.fetch_with_retry(&url, &body).await
    }

    /// Submit a signed action to POST /exchange.
    pub async fn exchange(
        &self,
        wallet: &LocalWallet,
        action: serde_json::Value,
        testnet: bool,
    ) -> Result<ExchangeAck, ExchangeError> {
        let payload = signer::signed_payload(wallet, action, next_nonce())?;
        let url = format!("{}/exchange", self.base_url(testnet));
        let value = self.fetch_with_retry(&url, &payload).await?;
        serde_json::from_value(value)
            .map_err(|e| ExchangeError::MalformedResponse(format!("exchange ack: {}", e)))
    }

    /// Asset universe + market context, served from the process-wide cache
    /// when fetched for the same network within the last 60 s. The entry is
    /// replaced atomically; a brief duplicate fetch under contention is
    /// acceptable, torn data is not.
    pub async fn get_asset_metadata(
        &self,
        testnet: bool,
    ) -> Result<Arc<AssetMetadata>, ExchangeError> {
        {
            let cache = self.meta_cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.is_fresh(testnet, self.meta_ttl) {
                    return Ok(Arc::clone(&entry.metadata));
                }
            }
        }

        let value = self
            .info(testnet, serde_json::json!({"type": "metaAndAssetCtxs"}))
            .await?;
        let (universe, contexts): MetaAndAssetCtxs = serde_json::from_value(value)
            .map_err(|e| ExchangeError::MalformedResponse(format!("metaAndAssetCtxs: {}", e)))?;
        let metadata = Arc::new(AssetMetadata {
            universe: universe.universe,
            contexts,
        });

        let mut cache = self.meta_cache.write().await;
        *cache = Some(MetaCacheEntry {
            testnet,
            metadata: Arc::clone(&metadata),
            fetched_at: Instant::now(),
        });
        Ok(metadata)
    }

    /// Resolve a symbol to its asset id, size precision, and max leverage.
    pub async fn get_asset_info(
        &self,
        symbol: &str,
        testnet: bool,
    ) -> Result<AssetInfo, ExchangeError> {
        let metadata = self.get_asset_metadata(testnet).await?;
        metadata
            .universe
            .iter()
            .position(|asset| asset.name == symbol)
            .map(|idx| AssetInfo {
                asset_id: idx as u32,
                sz_decimals: metadata.universe[idx].sz_decimals,
                max_leverage: metadata.universe[idx].max_leverage,
            })
            .ok_or_else(|| ExchangeError::UnknownAsset(symbol.to_string()))
    }

    /// Latest mid price for a symbol.
    pub async fn get_market_price(
        &self,
        symbol: &str,
        testnet: bool,
    ) -> Result<f64, ExchangeError> {
        let value = self
            .info(testnet, serde_json::json!({"type": "allMids"}))
            .await?;
        let mids: AllMids = serde_json::from_value(value)
            .map_err(|e| ExchangeError::MalformedResponse(format!("allMids: {}", e)))?;
        match mids.get(symbol) {
            Some(raw) => parse_px(raw),
            None => Err(ExchangeError::PriceUnavailable(symbol.to_string())),
        }
    }

    /// Authoritative clearinghouse read: margin summary plus positions.
    /// Raises on failure; callers deciding deletions must treat failure as
    /// "unknown", never as "no positions".
    pub async fn get_user_state(
        &self,
        address: &str,
        testnet: bool,
    ) -> Result<ClearinghouseState, ExchangeError> {
        let value = self
            .info(
                testnet,
                serde_json::json!({"type": "clearinghouseState", "user": address}),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ExchangeError::MalformedResponse(format!("clearinghouseState: {}", e)))
    }

    /// Authoritative position list derived from the clearinghouse state.
    pub async fn get_user_positions(
        &self,
        address: &str,
        testnet: bool,
    ) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let state = self.get_user_state(address, testnet).await?;
        let mut positions = Vec::new();
        for entry in &state.asset_positions {
            let raw = &entry.position;
            let position = ExchangePosition::from_signed_size(
                raw.coin.clone(),
                parse_px(&raw.szi)?,
                parse_px_opt(&raw.entry_px)?.unwrap_or(0.0),
                raw.leverage.value,
                parse_px_opt(&raw.liquidation_px)?,
                parse_px_opt(&raw.unrealized_pnl)?.unwrap_or(0.0),
                parse_px_opt(&raw.return_on_equity)?.unwrap_or(0.0),
            );
            if let Some(position) = position {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    /// Total account value from the margin summary.
    pub async fn get_account_value(
        &self,
        address: &str,
        testnet: bool,
    ) -> Result<f64, ExchangeError> {
        let state = self.get_user_state(address, testnet).await?;
        parse_px(&state.margin_summary.account_value)
    }

    /// Best-effort open-order list: used for display and verification only,
    /// so a failure degrades to an empty result instead of raising.
    pub async fn get_open_orders(&self, address: &str, testnet: bool) -> Vec<OpenOrder> {
        match self.open_orders_strict(address, testnet, "openOrders").await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(address, error = %e, "open-orders read failed, degrading to empty");
                Vec::new()
            }
        }
    }

    /// Best-effort frontend open-order list (includes trigger details).
    pub async fn get_frontend_open_orders(&self, address: &str, testnet: bool) -> Vec<OpenOrder> {
        match self
            .open_orders_strict(address, testnet, "frontendOpenOrders")
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                warn!(address, error = %e, "open-orders read failed, degrading to empty");
                Vec::new()
            }
        }
    }

    /// Authoritative frontend open-order list: raises on failure so an
    /// outage is never mistaken for an empty book. Cancel-then-close
    /// recovery depends on this distinction.
    pub async fn get_frontend_open_orders_strict(
        &self,
        address: &str,
        testnet: bool,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.open_orders_strict(address, testnet, "frontendOpenOrders")
            .await
    }

    async fn open_orders_strict(
        &self,
        address: &str,
        testnet: bool,
        query: &str,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        let value = self
            .info(testnet, serde_json::json!({"type": query, "user": address}))
            .await?;
        serde_json::from_value::<Vec<OpenOrder>>(value)
            .map_err(|e| ExchangeError::MalformedResponse(format!("{}: {}", query, e)))
    }

    /// Update leverage for a symbol. Best-effort at the call sites: a
    /// failure is logged by the caller and does not abort order placement,
    /// since trading on the exchange's existing leverage is safer than
    /// dropping a live decision.
    pub async fn set_leverage(
        &self,
        wallet: &LocalWallet,
        symbol: &str,
        leverage: u32,
        testnet: bool,
    ) -> Result<(), ExchangeError> {
        let asset = self.get_asset_info(symbol, testnet).await?;
        let capped = leverage.min(asset.max_leverage);
        if capped < leverage {
            warn!(symbol, leverage, capped, "leverage capped to asset maximum");
        }
        let action = serde_json::json!({
            "type": "updateLeverage",
            "asset": asset.asset_id,
            "isCross": true,
            "leverage": capped,
        });
        let ack = self.exchange(wallet, action, testnet).await?;
        if ack.status != "ok" {
            return Err(ExchangeError::Rejected(ack.status));
        }
        Ok(())
    }
}

impl Default for HyperliquidClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records requested delays instead of sleeping.
    pub struct RecordingBackoff {
        pub delays: Mutex<Vec<Duration>>,
    }

    impl RecordingBackoff {
        pub fn new() -> Arc<Self> {
            Arc::new(RecordingBackoff {
                delays: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Backoff for RecordingBackoff {
        async fn wait(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }
}
