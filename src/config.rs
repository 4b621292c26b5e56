use std::path::PathBuf;
use std::str::FromStr;

use ethers::types::Address;

use crate::error::{AppError, Result};
use crate::utils::ensure_dir;

pub const POLYGON_RPC_URL: &str = "https://polygon-rpc.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";
pub const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Polymarket CTF Exchange on Polygon, the contract whose OrdersMatched
/// logs are scanned.
pub const EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

/// Chain label the explorer API expects for Polygon lookups.
pub const ETHERSCAN_CHAIN: &str = "polygon";

/// USDC decimal precision used to scale collateral fill amounts.
pub const COLLATERAL_DECIMALS: u32 = 6;

/// Hard cap on market-catalog pages per refresh. A cursor bug upstream must
/// not turn the refresh into an infinite loop.
pub const MAX_MARKET_PAGES: usize = 200;

/// CLOB markets pagination cursors: base64("0") opens, base64("-1") closes.
pub const INITIAL_CURSOR: &str = "MA==";
pub const END_CURSOR: &str = "LTE=";

/// Longest window an explicit or relative scan may cover.
pub const MAX_SCAN_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub polygon_rpc_url: String,
    pub clob_api_url: String,
    /// CTF Exchange contract emitting OrdersMatched (EXCHANGE_ADDRESS)
    pub exchange_address: Address,
    /// Trades below this USD value are ignored (TRADE_THRESHOLD_USD)
    pub trade_threshold_usd: f64,
    /// Default wallet-age cutoff in hours (WALLET_MAX_AGE_HOURS)
    pub wallet_max_age_hours: f64,
    /// Market snapshot staleness limit in hours (MARKETS_CACHE_TTL_HOURS)
    pub markets_cache_ttl_hours: f64,
    /// Blocks per getLogs chunk (BLOCK_BATCH_SIZE)
    pub block_batch_size: u64,
    /// First-run lookback from chain head (INITIAL_LOOKBACK_BLOCKS)
    pub initial_lookback_blocks: u64,
    /// Persisted alert history cap, oldest dropped first (MAX_ALERT_HISTORY)
    pub max_alert_history: usize,
    /// Explorer lookups are skipped entirely without a key (ETHERSCAN_API_KEY)
    pub etherscan_api_key: Option<String>,
    /// Minimum delay between explorer requests (ETHERSCAN_RATE_LIMIT_MS)
    pub etherscan_rate_limit_ms: u64,
    pub state_file: PathBuf,
    pub markets_cache_file: PathBuf,
    pub scan_log_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(
            std::env::var("TRACKER_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        );
        ensure_dir(&data_dir)?;

        let scan_log_dir = PathBuf::from(
            std::env::var("SCAN_LOG_DIR").unwrap_or_else(|_| "runs".to_string()),
        );
        ensure_dir(&scan_log_dir)?;

        let state_file = std::env::var("STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("state.json"));
        let markets_cache_file = std::env::var("MARKETS_CACHE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("markets.json"));

        let exchange_address = std::env::var("EXCHANGE_ADDRESS")
            .unwrap_or_else(|_| EXCHANGE_ADDRESS.to_string());
        let exchange_address = Address::from_str(exchange_address.trim()).map_err(|_| {
            AppError::Config(format!(
                "EXCHANGE_ADDRESS is not a valid address: {exchange_address}"
            ))
        })?;

        // A placeholder key means "no explorer", same as an unset key.
        let etherscan_api_key = std::env::var("ETHERSCAN_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != "YourApiKeyToken");

        Ok(Self {
            polygon_rpc_url: std::env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| POLYGON_RPC_URL.to_string()),
            clob_api_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| CLOB_API_URL.to_string()),
            exchange_address,
            trade_threshold_usd: env_parse("TRADE_THRESHOLD_USD", 10_000.0),
            wallet_max_age_hours: env_parse("WALLET_MAX_AGE_HOURS", 48.0),
            markets_cache_ttl_hours: env_parse("MARKETS_CACHE_TTL_HOURS", 6.0),
            block_batch_size: env_parse("BLOCK_BATCH_SIZE", 30),
            initial_lookback_blocks: env_parse("INITIAL_LOOKBACK_BLOCKS", 90_000),
            max_alert_history: env_parse("MAX_ALERT_HISTORY", 500),
            etherscan_api_key,
            etherscan_rate_limit_ms: env_parse("ETHERSCAN_RATE_LIMIT_MS", 300),
            state_file,
            markets_cache_file,
            scan_log_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Read an env var and parse it, falling back to the default when the var is
/// unset or unparsable.
fn env_parse<T: FromStr + Copy>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(fallback)
}
