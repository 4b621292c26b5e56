use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{END_CURSOR, INITIAL_CURSOR, MAX_MARKET_PAGES};
use crate::error::Result;
use crate::types::{MarketCacheSnapshot, MarketTokenInfo};
use crate::utils::{read_json_file, write_json_file};

/// One market as returned by the CLOB markets endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMarket {
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub market_slug: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub tokens: Vec<RawToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawToken {
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
}

/// One page of the cursor protocol: data plus an opaque continuation marker.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsPage {
    #[serde(default)]
    pub data: Vec<RawMarket>,
    #[serde(default)]
    pub next_cursor: String,
}

/// Paginated upstream market catalog. The production impl talks to the CLOB
/// REST API; tests substitute in-memory pages.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch_page(&self, cursor: &str) -> Result<MarketsPage>;
}

pub struct ClobMarketSource {
    client: reqwest::Client,
    base_url: String,
}

impl ClobMarketSource {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl MarketSource for ClobMarketSource {
    async fn fetch_page(&self, cursor: &str) -> Result<MarketsPage> {
        let url = format!("{}/markets", self.base_url);
        let page = self
            .client
            .get(&url)
            .query(&[("next_cursor", cursor)])
            .send()
            .await?
            .error_for_status()?
            .json::<MarketsPage>()
            .await?;
        Ok(page)
    }
}

/// TTL-cached token → market metadata, backed by a persisted snapshot that
/// is refreshed transparently on miss or staleness.
pub struct MarketCache<S: MarketSource> {
    source: S,
    cache_file: PathBuf,
    ttl_hours: f64,
    tokens: HashMap<String, MarketTokenInfo>,
    outcomes: HashMap<String, Vec<String>>,
}

impl<S: MarketSource> MarketCache<S> {
    pub fn new(source: S, cache_file: PathBuf, ttl_hours: f64) -> Self {
        Self {
            source,
            cache_file,
            ttl_hours,
            tokens: HashMap::new(),
            outcomes: HashMap::new(),
        }
    }

    /// Load the persisted snapshot, refreshing if it is missing or stale.
    pub async fn init(&mut self) -> Result<()> {
        if let Some(snapshot) = read_json_file::<MarketCacheSnapshot>(&self.cache_file)? {
            if !self.is_stale(snapshot.fetched_at) {
                debug!(
                    tokens = snapshot.tokens.len(),
                    "Loaded market snapshot from cache file"
                );
                self.apply_snapshot(snapshot);
                return Ok(());
            }
        }
        self.refresh().await
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        let age_secs = (Utc::now() - fetched_at).num_seconds() as f64;
        age_secs < 0.0 || age_secs > self.ttl_hours * 3600.0
    }

    fn apply_snapshot(&mut self, snapshot: MarketCacheSnapshot) {
        self.tokens = snapshot.tokens;
        self.outcomes = snapshot.outcomes;
    }

    /// Walk the full cursor protocol, rebuild both maps, and persist the new
    /// snapshot atomically. Upstream failures propagate: a partial catalog
    /// would silently drop alerts downstream.
    pub async fn refresh(&mut self) -> Result<()> {
        let mut tokens = HashMap::new();
        let mut outcomes = HashMap::new();
        let mut cursor = INITIAL_CURSOR.to_string();
        let mut pages = 0usize;

        while pages < MAX_MARKET_PAGES {
            pages += 1;
            let page = self.source.fetch_page(&cursor).await?;
            for market in &page.data {
                let names: Vec<String> =
                    market.tokens.iter().map(|t| t.outcome.clone()).collect();
                outcomes.insert(market.condition_id.clone(), names);
                for token in &market.tokens {
                    tokens.insert(
                        token.token_id.clone(),
                        MarketTokenInfo {
                            token_id: token.token_id.clone(),
                            condition_id: market.condition_id.clone(),
                            question: market.question.clone(),
                            outcome: token.outcome.clone(),
                            slug: market.market_slug.clone(),
                            closed: market.closed,
                        },
                    );
                }
            }
            if page.next_cursor.is_empty() || page.next_cursor == END_CURSOR {
                break;
            }
            cursor = page.next_cursor;
        }

        let snapshot = MarketCacheSnapshot {
            fetched_at: Utc::now(),
            tokens,
            outcomes,
        };
        write_json_file(&self.cache_file, &snapshot)?;
        info!(
            tokens = snapshot.tokens.len(),
            markets = snapshot.outcomes.len(),
            pages,
            "Market snapshot refreshed"
        );
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Look up one token's market binding. An empty cache triggers `init`;
    /// a miss after load triggers exactly one refresh (a newly listed market
    /// may postdate the snapshot), never a retry loop.
    pub async fn get_token_info(&mut self, token_id: &str) -> Result<Option<MarketTokenInfo>> {
        if self.tokens.is_empty() {
            self.init().await?;
        }
        if !self.tokens.contains_key(token_id) {
            self.refresh().await?;
        }
        Ok(self.tokens.get(token_id).cloned())
    }

    /// Outcome names for a condition; empty if unknown.
    pub fn get_outcomes(&self, condition_id: &str) -> Vec<String> {
        self.outcomes.get(condition_id).cloned().unwrap_or_default()
    }
}
