use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "BUY"),
            TradeDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// One decoded OrdersMatched log, with the metadata needed for ordering.
/// Produced by the chain layer; carries raw asset ids and fill amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
    pub taker: Address,
    pub maker_asset_id: U256,
    pub taker_asset_id: U256,
    pub maker_amount_filled: U256,
    pub taker_amount_filled: U256,
}

/// A USD-classified view of one exchange event: exactly one side was
/// collateral, the other side is the outcome token that changed hands.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDetails {
    /// Taker address, lowercased hex.
    pub wallet: String,
    pub usd_value: f64,
    pub token_id: String,
    pub direction: TradeDirection,
    pub tx_hash: String,
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// One side of one prediction market at the moment a trade occurred.
/// Immutable once attached to an alert or wallet record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRef {
    pub condition_id: String,
    pub question: String,
    pub outcome: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_outcomes: Option<Vec<String>>,
}

/// One tradable token's binding to its market. Many tokens can share a
/// condition_id (one per outcome).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTokenInfo {
    pub token_id: String,
    pub condition_id: String,
    pub question: String,
    pub outcome: String,
    pub slug: String,
    pub closed: bool,
}

/// A full market-catalog refresh, persisted verbatim between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCacheSnapshot {
    pub fetched_at: DateTime<Utc>,
    /// token_id → token info
    pub tokens: HashMap<String, MarketTokenInfo>,
    /// condition_id → outcome names
    pub outcomes: HashMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Wallet tracking
// ---------------------------------------------------------------------------

/// Result of a successful explorer lookup, kept so later runs never repeat it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerRecord {
    /// Unix seconds of the wallet's first-ever transaction.
    pub first_tx_timestamp: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Per-wallet record created the first time the wallet is observed trading
/// above threshold. `first_activity_timestamp` is the best-known true
/// first-activity time; once set it is never decreased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub first_seen_block: u64,
    pub first_seen_at: DateTime<Utc>,
    pub first_trade_tx: String,
    pub first_trade_usd: f64,
    pub first_trade_direction: TradeDirection,
    pub first_trade_market: MarketRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_activity_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerRecord>,
}

impl WalletState {
    /// Seed a record from the wallet's first observed qualifying trade.
    /// The true first-activity time is left unset so the scan engine can
    /// resolve it (explorer lookup or first-seen fallback).
    pub fn first_trade(
        block_number: u64,
        tx_hash: &str,
        usd_value: f64,
        market: MarketRef,
        direction: TradeDirection,
        first_seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            first_seen_block: block_number,
            first_seen_at,
            first_trade_tx: tx_hash.to_string(),
            first_trade_usd: usd_value,
            first_trade_direction: direction,
            first_trade_market: market,
            first_activity_timestamp: None,
            explorer: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// One emitted detection. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub address: String,
    pub tx_hash: String,
    pub block_number: u64,
    /// Unix seconds of the block the trade landed in.
    pub block_timestamp: u64,
    pub usd_value: f64,
    pub market: MarketRef,
    pub direction: TradeDirection,
    pub created_at: DateTime<Utc>,
    /// Human-formatted first-seen time used verbatim by presentation layers.
    pub wallet_first_seen: String,
    pub wallet_age_hours: f64,
}

/// The full persisted tracker state. `alerts` is capped (oldest dropped
/// first); `last_processed_block` is monotonically non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingState {
    pub last_processed_block: u64,
    /// lowercased address → wallet record
    pub wallets: HashMap<String, WalletState>,
    pub alerts: Vec<AlertRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_direction_serializes_uppercase() {
        let buy = serde_json::to_string(&TradeDirection::Buy).unwrap();
        assert_eq!(buy, "\"BUY\"");
        let parsed: TradeDirection = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(parsed, TradeDirection::Sell);
    }

    #[test]
    fn tracking_state_tolerates_missing_fields() {
        let state: TrackingState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.last_processed_block, 0);
        assert!(state.wallets.is_empty());
        assert!(state.alerts.is_empty());
    }

    #[test]
    fn wallet_state_uses_camel_case_keys() {
        let wallet = WalletState::first_trade(
            42,
            "0xabc",
            12_000.0,
            MarketRef {
                condition_id: "0xc1".to_string(),
                question: "Will it rain?".to_string(),
                outcome: "Yes".to_string(),
                slug: "will-it-rain".to_string(),
                all_outcomes: None,
            },
            TradeDirection::Buy,
            Utc::now(),
        );
        let json = serde_json::to_value(&wallet).unwrap();
        assert!(json.get("firstSeenBlock").is_some());
        assert!(json.get("firstTradeTx").is_some());
        // unset optional fields are omitted entirely
        assert!(json.get("firstActivityTimestamp").is_none());
        assert!(json.get("explorer").is_none());
    }
}
