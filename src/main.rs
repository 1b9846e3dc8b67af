use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use perpetua::application::decision::{DecisionProvider, HoldProvider, HttpDecisionProvider};
use perpetua::application::orchestrator::{TradingCycleOrchestrator, WsCandleSource};
use perpetua::application::reconciler::PositionReconciler;
use perpetua::config::AppConfig;
use perpetua::infrastructure::hyperliquid::client::HyperliquidClient;
use perpetua::infrastructure::hyperliquid::executor::OrderExecutor;
use perpetua::persistence::lock::TradingLockStore;
use perpetua::persistence::models::PositionRecord;
use perpetua::persistence::repository::{
    BotConfigRepository, PositionRepository, TradeRepository,
};
use perpetua::scheduler::{run_recurring, CircuitBreakerConfig};

#[derive(Clone)]
struct AppState {
    positions: PositionRepository,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perpetua=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(
        cycle_interval = config.cycle_interval_seconds,
        reconcile_interval = config.reconcile_interval_seconds,
        "Perpetua trading core starting"
    );

    let pool = perpetua::persistence::init_database(&config.database_url).await?;
    let bot_configs = BotConfigRepository::new(pool.clone());
    let positions = PositionRepository::new(pool.clone());
    let trades = TradeRepository::new(pool.clone());
    let locks = TradingLockStore::new(pool.clone());

    let client = Arc::new(HyperliquidClient::new());
    let executor = Arc::new(OrderExecutor::new(client.clone()));

    let provider: Arc<dyn DecisionProvider> = match &config.decision_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "using external decision service");
            Arc::new(HttpDecisionProvider::new(endpoint.clone()))
        }
        None => {
            warn!("no decision endpoint configured, every cycle will HOLD");
            Arc::new(HoldProvider)
        }
    };

    let orchestrator = Arc::new(
        TradingCycleOrchestrator::new(
            executor,
            locks,
            positions.clone(),
            trades,
            Arc::new(WsCandleSource),
            provider,
        )
        .with_candle_target(config.candle_target),
    );

    // Trading cycles: fan out across active users each tick. Per-user
    // serialization comes from the trading lock, not from the scheduler.
    let cycle_orchestrator = orchestrator.clone();
    let cycle_configs = bot_configs.clone();
    let cycle_interval = Duration::from_secs(config.cycle_interval_seconds);
    tokio::spawn(async move {
        run_recurring(
            "trading_cycle",
            cycle_interval,
            CircuitBreakerConfig::default(),
            move || {
                let orchestrator = cycle_orchestrator.clone();
                let configs = cycle_configs.clone();
                async move { run_all_cycles(orchestrator, configs).await }
            },
        )
        .await;
    });

    let reconciler = Arc::new(PositionReconciler::new(
        client,
        bot_configs,
        positions.clone(),
    ));
    let reconcile_interval = Duration::from_secs(config.reconcile_interval_seconds);
    tokio::spawn(async move {
        run_recurring(
            "position_reconciler",
            reconcile_interval,
            CircuitBreakerConfig::default(),
            move || {
                let reconciler = reconciler.clone();
                async move {
                    reconciler.run_once().await;
                    Ok(())
                }
            },
        )
        .await;
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/positions", get(get_positions))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { positions });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);

    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Shutdown complete");
    Ok(())
}

/// One tick of the trading loop: run a cycle for every active user
/// concurrently. Only a failure to list configurations counts against the
/// circuit breaker; per-user errors are logged and the loop moves on.
async fn run_all_cycles(
    orchestrator: Arc<TradingCycleOrchestrator>,
    configs: BotConfigRepository,
) -> Result<(), String> {
    let active = configs.get_active().await.map_err(|e| e.to_string())?;
    if active.is_empty() {
        return Ok(());
    }

    let mut set = JoinSet::new();
    for config in active {
        let orchestrator = orchestrator.clone();
        set.spawn(async move {
            let user_id = config.user_id.clone();
            (user_id, orchestrator.run_cycle(&config).await)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((user_id, Ok(report))) => {
                if report.skipped_lock_held {
                    continue;
                }
                for symbol in &report.symbols {
                    info!(
                        user_id = %user_id,
                        symbol = %symbol.symbol,
                        decision = %symbol.decision,
                        executed = symbol.executed,
                        "cycle outcome"
                    );
                }
            }
            Ok((user_id, Err(e))) => {
                warn!(user_id = %user_id, error = %e, "trading cycle failed");
            }
            Err(e) => {
                warn!(error = %e, "trading cycle task panicked");
            }
        }
    }
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_positions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PositionRecord>>, StatusCode> {
    state
        .positions
        .get_all()
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "positions read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
