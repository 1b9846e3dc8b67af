/// Runtime configuration loaded from the environment.
///
/// Every knob has a safe default; invalid values are rejected with a
/// warning and the default kept, so a typo in one variable never takes
/// the whole service down.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string
    pub database_url: String,
    /// Bind address for the status HTTP surface
    pub listen_addr: String,
    /// Seconds between trading cycles per user
    pub cycle_interval_seconds: u64,
    /// Seconds between reconciliation passes
    pub reconcile_interval_seconds: u64,
    /// Candles collected before computing indicators
    pub candle_target: usize,
    /// External decision service; absent means every cycle holds
    pub decision_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite://data/perpetua.db".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            cycle_interval_seconds: 180,
            reconcile_interval_seconds: 60,
            candle_target: 60,
            decision_endpoint: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if addr.parse::<std::net::SocketAddr>().is_ok() {
                config.listen_addr = addr;
            } else {
                tracing::warn!(
                    "Invalid LISTEN_ADDR '{}', using default: {}",
                    addr,
                    config.listen_addr
                );
            }
        }

        if let Ok(interval) = std::env::var("CYCLE_INTERVAL_SECONDS") {
            match interval.parse::<u64>() {
                Ok(value) if (30..=3600).contains(&value) => {
                    config.cycle_interval_seconds = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid CYCLE_INTERVAL_SECONDS value: {} (must be between 30 and 3600), using default: {}",
                        value, config.cycle_interval_seconds
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse CYCLE_INTERVAL_SECONDS '{}': {}, using default: {}",
                        interval,
                        e,
                        config.cycle_interval_seconds
                    );
                }
            }
        }

        if let Ok(interval) = std::env::var("RECONCILE_INTERVAL_SECONDS") {
            match interval.parse::<u64>() {
                Ok(value) if (15..=3600).contains(&value) => {
                    config.reconcile_interval_seconds = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid RECONCILE_INTERVAL_SECONDS value: {} (must be between 15 and 3600), using default: {}",
                        value, config.reconcile_interval_seconds
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse RECONCILE_INTERVAL_SECONDS '{}': {}, using default: {}",
                        interval,
                        e,
                        config.reconcile_interval_seconds
                    );
                }
            }
        }

        if let Ok(endpoint) = std::env::var("DECISION_ENDPOINT") {
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                config.decision_endpoint = Some(endpoint);
            } else if !endpoint.trim().is_empty() {
                tracing::warn!(
                    "Invalid DECISION_ENDPOINT '{}' (must be an http(s) URL), decisions disabled",
                    endpoint
                );
            }
        }

        if let Ok(target) = std::env::var("CANDLE_TARGET") {
            if let Ok(value) = target.parse::<usize>() {
                if (30..=500).contains(&value) {
                    config.candle_target = value;
                } else {
                    tracing::warn!(
                        "Invalid CANDLE_TARGET value: {} (must be between 30 and 500), using default: {}",
                        value, config.candle_target
                    );
                }
            }
        }

        config
    }
}
