use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::config::ETHERSCAN_API_URL;
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: String,
    /// Array of transactions on success; the API reuses this field for error
    /// strings, so it stays untyped until the status is known.
    #[serde(default)]
    result: serde_json::Value,
}

/// Rate-limited, memoized lookup of a wallet's first-ever transaction
/// timestamp. One instance serializes all of its requests: only the last
/// request time is tracked, and the remaining deficit is slept off before
/// the next call.
pub struct EtherscanClient {
    client: reqwest::Client,
    api_key: String,
    chain: String,
    rate_limit: Duration,
    last_request_at: Option<Instant>,
    /// lowercased address → first-tx seconds; `None` memoizes the explicit
    /// "no transactions found" response so empty wallets are asked once.
    cache: HashMap<String, Option<u64>>,
}

impl EtherscanClient {
    pub fn new(api_key: String, rate_limit: Duration, chain: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            chain,
            rate_limit,
            last_request_at: None,
            cache: HashMap::new(),
        })
    }

    /// First-transaction timestamp for `address`, or `None` for a wallet the
    /// explorer has never seen. Transport and non-success responses other
    /// than the empty-wallet case are errors.
    pub async fn get_first_transaction_timestamp(&mut self, address: &str) -> Result<Option<u64>> {
        let key = address.to_lowercase();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }

        self.enforce_rate_limit().await;

        let response = self
            .client
            .get(ETHERSCAN_API_URL)
            .query(&[
                ("chain", self.chain.as_str()),
                ("module", "account"),
                ("action", "txlist"),
                ("address", key.as_str()),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("page", "1"),
                ("offset", "1"),
                ("sort", "asc"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Explorer(format!(
                "explorer request failed with status {}",
                response.status()
            )));
        }

        let payload = response.json::<ExplorerResponse>().await?;
        let timestamp = parse_first_tx_response(&payload)?;
        debug!(address = %key, ?timestamp, "Explorer first-tx lookup complete");
        self.cache.insert(key, timestamp);
        Ok(timestamp)
    }

    async fn enforce_rate_limit(&mut self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        self.last_request_at = Some(Instant::now());
    }
}

fn parse_first_tx_response(payload: &ExplorerResponse) -> Result<Option<u64>> {
    if payload.status != "1" {
        if payload.message.to_lowercase().contains("no transactions found") {
            return Ok(None);
        }
        return Err(AppError::Explorer(format!(
            "explorer responded with status {} ({})",
            payload.status, payload.message
        )));
    }

    let entries = payload
        .result
        .as_array()
        .ok_or_else(|| AppError::Explorer("explorer result was not an array".to_string()))?;

    let Some(first) = entries.first() else {
        return Ok(None);
    };

    first
        .get("timeStamp")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| AppError::Explorer("malformed timeStamp in explorer response".to_string()))
}
