// config.rs — typed configuration surface (spec.md §6 "Configuration
// surface"). Flat scalars come from the environment (teacher precedent:
// main.rs reads `std::env::var` directly); the per-instrument tables are
// naturally nested data, so they load from an optional TOML file.
use crate::instrument::{Instrument, MinOrderSize};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Fixed,
    Equal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentToml {
    pub max_position_size: Decimal,
    pub reduction_threshold: Decimal,
    pub min_order_size: MinOrderSize,
    #[serde(default)]
    pub qty_decimals: Option<u32>,
    #[serde(default)]
    pub tick_size: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsToml {
    #[serde(default)]
    pub instrument: HashMap<String, InstrumentToml>,
}

/// The fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub followed_users: Vec<String>,
    pub trading_mode: TradingMode,
    pub fixed_ratio: Decimal,
    pub equal_ratio: Decimal,
    pub account_cache_ttl_secs: u64,
    pub emergency_stop: bool,
    pub instruments: Vec<Instrument>,
    pub redis_url: String,
    pub master_ws_url: String,
    pub master_rest_url: String,
    pub follower_rest_url: String,
    pub follower_ws_url: Option<String>,
    pub follower_api_key: String,
    pub follower_api_secret: String,
}

impl EngineConfig {
    /// Loads config from environment variables plus an optional
    /// `instruments.toml` file naming the per-instrument tables
    /// (`supportedCoins`, `maxPositionSize`, `minOrderSize`,
    /// `reductionThreshold` in spec.md §6's table).
    pub fn from_env(instruments_path: Option<&str>) -> Result<Self, crate::error::EngineError> {
        let followed_users = env_list("FOLLOWED_USERS")?;
        let trading_mode = match std::env::var("TRADING_MODE").as_deref() {
            Ok("equal") => TradingMode::Equal,
            Ok("fixed") | Err(_) => TradingMode::Fixed,
            Ok(other) => {
                return Err(crate::error::EngineError::Config(format!(
                    "unknown tradingMode: {other}"
                )))
            }
        };
        let fixed_ratio = env_decimal("FIXED_RATIO", Decimal::new(1, 1))?; // default 0.1
        let equal_ratio = env_decimal("EQUAL_RATIO", Decimal::ONE)?;
        let account_cache_ttl_secs = env_u64("ACCOUNT_CACHE_TTL", 5)?;
        let emergency_stop = std::env::var("EMERGENCY_STOP")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let master_ws_url = std::env::var("MASTER_WS_URL")
            .unwrap_or_else(|_| "wss://api.hyperliquid.xyz/ws".to_string());
        let master_rest_url = std::env::var("MASTER_REST_URL")
            .unwrap_or_else(|_| "https://api.hyperliquid.xyz".to_string());

        let follower_rest_url = std::env::var("FOLLOWER_REST_URL")
            .map_err(|_| crate::error::EngineError::Config("FOLLOWER_REST_URL not set".into()))?;
        let follower_api_key = std::env::var("FOLLOWER_API_KEY")
            .map_err(|_| crate::error::EngineError::Config("FOLLOWER_API_KEY not set".into()))?;
        let follower_api_secret = std::env::var("FOLLOWER_API_SECRET").map_err(|_| {
            crate::error::EngineError::Config("FOLLOWER_API_SECRET not set".into())
        })?;
        let follower_ws_url = std::env::var("FOLLOWER_WS_URL").ok();

        let instruments = match instruments_path {
            Some(path) => load_instruments_toml(path)?,
            None => Vec::new(),
        };

        if followed_users.is_empty() {
            return Err(crate::error::EngineError::Config(
                "followedUsers must name at least one Master account".into(),
            ));
        }

        Ok(Self {
            followed_users,
            trading_mode,
            fixed_ratio,
            equal_ratio,
            account_cache_ttl_secs,
            emergency_stop,
            instruments,
            redis_url,
            master_ws_url,
            master_rest_url,
            follower_rest_url,
            follower_ws_url,
            follower_api_key,
            follower_api_secret,
        })
    }
}

fn env_list(key: &str) -> Result<Vec<String>, crate::error::EngineError> {
    Ok(std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal, crate::error::EngineError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| crate::error::EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, crate::error::EngineError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| crate::error::EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn load_instruments_toml(path: &str) -> Result<Vec<Instrument>, crate::error::EngineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| crate::error::EngineError::Config(format!("reading {path}: {e}")))?;
    let parsed: InstrumentsToml = toml::from_str(&content)
        .map_err(|e| crate::error::EngineError::Config(format!("parsing {path}: {e}")))?;

    Ok(parsed
        .instrument
        .into_iter()
        .map(|(symbol, cfg)| Instrument {
            symbol,
            min_order_size: cfg.min_order_size,
            qty_decimals: cfg.qty_decimals.unwrap_or(4),
            tick_size: cfg.tick_size.unwrap_or(Decimal::new(1, 1)),
            max_abs_position: cfg.max_position_size,
            aggressive_reduction_threshold: cfg.reduction_threshold,
        })
        .collect())
}
