//! End-to-end tests over a mocked Hyperliquid exchange.
//!
//! An axum server fakes POST /info and POST /exchange, recording every
//! signed action it receives; the database is in-memory SQLite. Candles and
//! decisions come from scripted stubs, so a whole trading cycle runs
//! without touching the network.

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use std::sync::{Arc, Mutex};

use perpetua::application::decision::{DecisionError, DecisionProvider, DecisionRequest};
use perpetua::application::orchestrator::{MarketDataSource, TradingCycleOrchestrator};
use perpetua::application::reconciler::PositionReconciler;
use perpetua::domain::entities::decision::DecisionOutcome;
use perpetua::domain::errors::ExchangeError;
use perpetua::domain::services::indicators::Candle;
use perpetua::infrastructure::hyperliquid::client::HyperliquidClient;
use perpetua::infrastructure::hyperliquid::executor::{NuclearCloseOutcome, OrderExecutor, PlacedOrder};
use perpetua::infrastructure::hyperliquid::signer::wallet_from_key;
use perpetua::persistence::lock::TradingLockStore;
use perpetua::persistence::models::{BotConfigRecord, CreatePosition};
use perpetua::persistence::repository::{BotConfigRepository, PositionRepository, TradeRepository};

const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const TEST_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

#[derive(Default)]
struct MockExchange {
    /// Signed BTC position size as the clearinghouse reports it.
    btc_szi: Mutex<String>,
    /// Rows returned by frontendOpenOrders.
    open_orders: Mutex<Vec<serde_json::Value>>,
    /// Every action body received on /exchange, in order.
    actions: Mutex<Vec<serde_json::Value>>,
    account_value: Mutex<String>,
    next_oid: Mutex<u64>,
    /// When set, open-order queries answer 500 instead of a list.
    fail_open_orders: Mutex<bool>,
}

impl MockExchange {
    fn new(account_value: &str, btc_szi: &str) -> Arc<Self> {
        let state = Arc::new(MockExchange::default());
        *state.account_value.lock().unwrap() = account_value.to_string();
        *state.btc_szi.lock().unwrap() = btc_szi.to_string();
        *state.next_oid.lock().unwrap() = 1000;
        state
    }

    fn add_open_order(&self, coin: &str, oid: u64) {
        self.open_orders.lock().unwrap().push(serde_json::json!({
            "coin": coin,
            "oid": oid,
            "side": "A",
            "limitPx": "0",
            "sz": "0.5",
            "orderType": "Stop Market",
            "reduceOnly": true,
        }));
    }

    fn actions_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a["type"] == kind)
            .cloned()
            .collect()
    }
}

async fn info_handler(
    State(state): State<Arc<MockExchange>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    match body["type"].as_str().unwrap_or_default() {
        "allMids" => Ok(Json(serde_json::json!({"BTC": "50000.0", "ETH": "3000.0"}))),
        "metaAndAssetCtxs" => Ok(Json(serde_json::json!([
            {"universe": [
                {"name": "BTC", "szDecimals": 3, "maxLeverage": 50},
                {"name": "ETH", "szDecimals": 2, "maxLeverage": 50}
            ]},
            [{"midPx": "50000.0"}, {"midPx": "3000.0"}]
        ]))),
        "clearinghouseState" => {
            let szi = state.btc_szi.lock().unwrap().clone();
            let mut positions = Vec::new();
            if szi != "0" {
                positions.push(serde_json::json!({
                    "type": "oneWay",
                    "position": {
                        "coin": "BTC",
                        "szi": szi,
                        "entryPx": "48000.0",
                        "leverage": {"type": "cross", "value": 10},
                        "liquidationPx": "40000.0",
                        "unrealizedPnl": "500.0",
                        "returnOnEquity": "0.10"
                    }
                }));
            }
            Ok(Json(serde_json::json!({
                "marginSummary": {"accountValue": state.account_value.lock().unwrap().clone()},
                "assetPositions": positions
            })))
        }
        "openOrders" | "frontendOpenOrders" => {
            if *state.fail_open_orders.lock().unwrap() {
                return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
            }
            Ok(Json(serde_json::Value::Array(
                state.open_orders.lock().unwrap().clone(),
            )))
        }
        other => panic!("unexpected info query: {}", other),
    }
}

async fn exchange_handler(
    State(state): State<Arc<MockExchange>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let action = body["action"].clone();
    state.actions.lock().unwrap().push(action.clone());

    match action["type"].as_str().unwrap_or_default() {
        "order" => {
            let orders = action["orders"].as_array().cloned().unwrap_or_default();
            let mut statuses = Vec::new();
            for order in &orders {
                let mut next = state.next_oid.lock().unwrap();
                *next += 1;
                statuses.push(serde_json::json!({
                    "filled": {"oid": *next, "totalSz": order["s"], "avgPx": order["p"]}
                }));
            }
            Json(serde_json::json!({
                "status": "ok",
                "response": {"type": "order", "data": {"statuses": statuses}}
            }))
        }
        "cancel" => {
            let cancels = action["cancels"].as_array().cloned().unwrap_or_default();
            let mut open = state.open_orders.lock().unwrap();
            for cancel in &cancels {
                let oid = cancel["o"].as_u64().unwrap_or_default();
                open.retain(|o| o["oid"].as_u64() != Some(oid));
            }
            let statuses: Vec<_> = cancels
                .iter()
                .map(|_| serde_json::json!({"success": "success"}))
                .collect();
            Json(serde_json::json!({
                "status": "ok",
                "response": {"type": "cancel", "data": {"statuses": statuses}}
            }))
        }
        "updateLeverage" => Json(serde_json::json!({
            "status": "ok",
            "response": {"type": "default"}
        })),
        other => panic!("unexpected exchange action: {}", other),
    }
}

async fn spawn_mock(state: Arc<MockExchange>) -> String {
    let app = Router::new()
        .route("/info", post(info_handler))
        .route("/exchange", post(exchange_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct ScriptedProvider {
    decision: String,
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionOutcome, DecisionError> {
        Ok(DecisionOutcome {
            decision: self.decision.clone(),
            reasoning: "scripted".to_string(),
            confidence: 0.9,
        })
    }
}

struct CannedCandles;

#[async_trait]
impl MarketDataSource for CannedCandles {
    async fn candles(
        &self,
        _symbol: &str,
        target: usize,
        _testnet: bool,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let base = Utc::now() - chrono::Duration::minutes(5 * target as i64);
        Ok((0..target)
            .map(|i| {
                let close = 50_000.0 + 50.0 * ((i % 7) as f64 - 3.0);
                Candle {
                    time: base + chrono::Duration::minutes(5 * i as i64),
                    open: close - 20.0,
                    high: close + 100.0,
                    low: close - 100.0,
                    close,
                }
            })
            .collect())
    }
}

fn test_config(user_id: &str) -> BotConfigRecord {
    BotConfigRecord {
        user_id: user_id.to_string(),
        active: true,
        model: "test-model".to_string(),
        symbols: "BTC".to_string(),
        max_leverage: 10,
        max_position_size_pct: 0.1,
        daily_loss_limit: 500.0,
        min_account_value: 50.0,
        starting_capital: 1000.0,
        wallet_address: TEST_ADDRESS.to_string(),
        wallet_key: TEST_KEY.to_string(),
        testnet: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn build_orchestrator(
    base: &str,
    decision: &str,
) -> (
    TradingCycleOrchestrator,
    PositionRepository,
    TradeRepository,
    TradingLockStore,
) {
    let pool = perpetua::persistence::init_database("sqlite::memory:")
        .await
        .unwrap();
    let positions = PositionRepository::new(pool.clone());
    let trades = TradeRepository::new(pool.clone());
    let locks = TradingLockStore::new(pool);

    let client = Arc::new(HyperliquidClient::new().with_base_url(base));
    let executor = Arc::new(OrderExecutor::new(client));
    let orchestrator = TradingCycleOrchestrator::new(
        executor,
        locks.clone(),
        positions.clone(),
        trades.clone(),
        Arc::new(CannedCandles),
        Arc::new(ScriptedProvider {
            decision: decision.to_string(),
        }),
    );
    (orchestrator, positions, trades, locks)
}

#[tokio::test]
async fn nuclear_close_cancels_orders_then_closes_position() {
    let state = MockExchange::new("1000.0", "0.5");
    state.add_open_order("BTC", 11);
    state.add_open_order("BTC", 12);
    state.add_open_order("ETH", 13);
    let base = spawn_mock(state.clone()).await;

    let client = Arc::new(HyperliquidClient::new().with_base_url(&base));
    let executor = OrderExecutor::new(client);
    let wallet = wallet_from_key(TEST_KEY).unwrap();

    let outcome = executor
        .nuclear_close_position(&wallet, TEST_ADDRESS, "BTC", true)
        .await
        .unwrap();

    // Two BTC trigger orders cancelled, the ETH order untouched
    match outcome {
        NuclearCloseOutcome::Closed { cancelled, close } => {
            assert_eq!(cancelled, 2);
            assert!(matches!(close, PlacedOrder::Filled { .. }));
        }
        other => panic!("expected Closed, got {:?}", other),
    }
    assert_eq!(state.open_orders.lock().unwrap().len(), 1);

    let cancels = state.actions_of_type("cancel");
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0]["cancels"].as_array().unwrap().len(), 2);

    // The close is a single reduce-only sell 3% under mid
    let orders = state.actions_of_type("order");
    assert_eq!(orders.len(), 1);
    let close_order = &orders[0]["orders"][0];
    assert_eq!(close_order["b"], false);
    assert_eq!(close_order["r"], true);
    assert_eq!(close_order["s"], "0.5");
    assert_eq!(close_order["p"], "48500");
}

#[tokio::test]
async fn nuclear_close_reports_no_position() {
    let state = MockExchange::new("1000.0", "0");
    let base = spawn_mock(state.clone()).await;

    let client = Arc::new(HyperliquidClient::new().with_base_url(&base));
    let executor = OrderExecutor::new(client);
    let wallet = wallet_from_key(TEST_KEY).unwrap();

    let outcome = executor
        .nuclear_close_position(&wallet, TEST_ADDRESS, "BTC", true)
        .await
        .unwrap();
    assert_eq!(outcome, NuclearCloseOutcome::NoPosition { cancelled: 0 });
    assert!(state.actions_of_type("order").is_empty());
}

#[tokio::test]
async fn nuclear_close_aborts_when_order_list_unreachable() {
    let state = MockExchange::new("1000.0", "0.5");
    state.add_open_order("BTC", 11);
    *state.fail_open_orders.lock().unwrap() = true;
    let base = spawn_mock(state.clone()).await;

    let client = Arc::new(HyperliquidClient::new().with_base_url(&base));
    let executor = OrderExecutor::new(client);
    let wallet = wallet_from_key(TEST_KEY).unwrap();

    // An outage on the order list must not read as "nothing to cancel":
    // the recovery aborts before touching the position.
    let result = executor
        .nuclear_close_position(&wallet, TEST_ADDRESS, "BTC", true)
        .await;
    assert!(result.is_err());
    assert!(state.actions_of_type("cancel").is_empty());
    assert!(state.actions_of_type("order").is_empty());
}

#[tokio::test]
async fn open_long_cycle_places_entry_and_protective_orders() {
    let state = MockExchange::new("1000.0", "0");
    let base = spawn_mock(state.clone()).await;
    let (orchestrator, positions, trades, locks) = build_orchestrator(&base, "OPEN_LONG").await;
    let config = test_config("alice");

    let report = orchestrator.run_cycle(&config).await.unwrap();
    assert!(!report.skipped_lock_held);
    assert_eq!(report.symbols.len(), 1);
    assert!(report.symbols[0].executed, "error: {:?}", report.symbols[0].error);

    // Entry plus SL and TP triggers, each its own signed action
    let orders = state.actions_of_type("order");
    assert_eq!(orders.len(), 3);
    let entry = &orders[0]["orders"][0];
    assert_eq!(entry["b"], true);
    assert_eq!(entry["r"], false);
    assert_eq!(entry["s"], "0.002");
    let sl = &orders[1]["orders"][0];
    assert_eq!(sl["t"]["trigger"]["tpsl"], "sl");
    assert_eq!(sl["t"]["trigger"]["isMarket"], true);
    assert_eq!(sl["b"], false);
    let tp = &orders[2]["orders"][0];
    assert_eq!(tp["t"]["trigger"]["tpsl"], "tp");

    assert_eq!(state.actions_of_type("updateLeverage").len(), 1);

    let row = positions
        .get_by_user_and_symbol("alice", "BTC")
        .await
        .unwrap()
        .expect("position row persisted");
    assert_eq!(row.side, "LONG");
    assert!(row.stop_loss.unwrap() < row.entry_price);
    assert!(row.take_profit.unwrap() > row.entry_price);
    assert!(row.sl_oid.is_some() && row.tp_oid.is_some());

    let ledger = trades.get_by_user("alice", 10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].action, "open");
    assert_eq!(ledger[0].status, "executed");
    assert_eq!(ledger[0].reasoning, "scripted");

    // Lock released after the cycle
    locks.acquire("alice").await.unwrap();
}

#[tokio::test]
async fn close_cycle_clears_position_and_writes_ledger() {
    let state = MockExchange::new("1000.0", "0.25");
    let base = spawn_mock(state.clone()).await;
    let (orchestrator, positions, trades, _locks) = build_orchestrator(&base, "CLOSE").await;
    let config = test_config("alice");

    positions
        .upsert(CreatePosition {
            user_id: "alice".to_string(),
            symbol: "BTC".to_string(),
            side: "LONG".to_string(),
            size: 0.25,
            leverage: 10,
            entry_price: 48_000.0,
            stop_loss: None,
            take_profit: None,
            entry_oid: Some(1),
            sl_oid: None,
            tp_oid: None,
        })
        .await
        .unwrap();

    let report = orchestrator.run_cycle(&config).await.unwrap();
    assert!(report.symbols[0].executed);

    let orders = state.actions_of_type("order");
    assert_eq!(orders.len(), 1);
    let close = &orders[0]["orders"][0];
    assert_eq!(close["b"], false);
    assert_eq!(close["r"], true);

    assert!(positions
        .get_by_user_and_symbol("alice", "BTC")
        .await
        .unwrap()
        .is_none());

    let ledger = trades.get_by_user("alice", 10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].action, "close");
    assert_eq!(ledger[0].pnl, Some(500.0));
}

#[tokio::test]
async fn hold_cycle_touches_nothing() {
    let state = MockExchange::new("1000.0", "0");
    let base = spawn_mock(state.clone()).await;
    let (orchestrator, positions, trades, _locks) = build_orchestrator(&base, "HOLD").await;

    let report = orchestrator.run_cycle(&test_config("alice")).await.unwrap();
    assert!(!report.symbols[0].executed);
    assert!(state.actions_of_type("order").is_empty());
    assert!(positions.get_by_user("alice").await.unwrap().is_empty());
    assert!(trades.get_by_user("alice", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn gibberish_decision_coerces_to_hold() {
    let state = MockExchange::new("1000.0", "0");
    let base = spawn_mock(state.clone()).await;
    let (orchestrator, _positions, _trades, _locks) =
        build_orchestrator(&base, "BUY THE DIP").await;

    let report = orchestrator.run_cycle(&test_config("alice")).await.unwrap();
    assert!(report.symbols[0].coerced);
    assert!(!report.symbols[0].executed);
    assert!(state.actions_of_type("order").is_empty());
}

#[tokio::test]
async fn drained_account_downgrades_entry() {
    let state = MockExchange::new("20.0", "0");
    let base = spawn_mock(state.clone()).await;
    let (orchestrator, _positions, _trades, _locks) = build_orchestrator(&base, "OPEN_LONG").await;

    // Account value below the 50.0 minimum
    let report = orchestrator.run_cycle(&test_config("alice")).await.unwrap();
    assert!(report.symbols[0].risk_downgrade.is_some());
    assert!(!report.symbols[0].executed);
    assert!(state.actions_of_type("order").is_empty());
}

#[tokio::test]
async fn reconciler_deletes_stale_rows_only() {
    let state = MockExchange::new("1000.0", "0.25");
    let base = spawn_mock(state.clone()).await;

    let pool = perpetua::persistence::init_database("sqlite::memory:")
        .await
        .unwrap();
    let configs = BotConfigRepository::new(pool.clone());
    let positions = PositionRepository::new(pool.clone());

    sqlx::query(
        r#"
        INSERT INTO bot_configs
            (user_id, active, model, symbols, max_leverage, max_position_size_pct,
             daily_loss_limit, min_account_value, starting_capital,
             wallet_address, wallet_key, testnet)
        VALUES ('alice', 1, 'test-model', 'BTC,ETH', 10, 0.1, 500.0, 50.0, 1000.0, ?, ?, 1)
        "#,
    )
    .bind(TEST_ADDRESS)
    .bind(TEST_KEY)
    .execute(&pool)
    .await
    .unwrap();

    // BTC exists on the exchange, ETH does not
    for (symbol, size) in [("BTC", 0.25), ("ETH", 1.0)] {
        positions
            .upsert(CreatePosition {
                user_id: "alice".to_string(),
                symbol: symbol.to_string(),
                side: "LONG".to_string(),
                size,
                leverage: 10,
                entry_price: 100.0,
                stop_loss: None,
                take_profit: None,
                entry_oid: None,
                sl_oid: None,
                tp_oid: None,
            })
            .await
            .unwrap();
    }

    let client = Arc::new(HyperliquidClient::new().with_base_url(&base));
    let reconciler = PositionReconciler::new(client, configs, positions.clone());
    let report = reconciler.run_once().await;

    assert_eq!(report.users_checked, 1);
    assert_eq!(report.users_skipped, 0);
    assert_eq!(report.rows_deleted, 1);
    let remaining = positions.get_by_user("alice").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].symbol, "BTC");
}
