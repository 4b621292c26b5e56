use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::chain::events::extract_trade_details;
use crate::chain::ChainClient;
use crate::explorer::EtherscanClient;
use crate::markets::{MarketCache, MarketSource};
use crate::state::TrackingStore;
use crate::types::{AlertRecord, ExchangeEvent, ExplorerRecord, MarketRef, WalletState};
use crate::utils::{format_local_time, unix_to_datetime};
use crate::error::Result;

/// An explicit UTC scan window. Supplying one makes the scan read-only:
/// persisted progress is never advanced by a what-if run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// The scan engine: resolves a window to a block range, walks exchange logs
/// in chunks, classifies wallet age, and emits alerts while advancing
/// persisted progress exactly once per mutating run.
pub struct Tracker<C: ChainClient, S: MarketSource> {
    chain: C,
    state: TrackingStore,
    markets: MarketCache<S>,
    explorer: Option<EtherscanClient>,
    trade_threshold_usd: f64,
    block_batch_size: u64,
    initial_lookback_blocks: u64,
    /// Per-run memo so one block's timestamp is fetched at most once.
    block_ts_cache: HashMap<u64, u64>,
}

impl<C: ChainClient, S: MarketSource> Tracker<C, S> {
    pub fn new(
        chain: C,
        state: TrackingStore,
        markets: MarketCache<S>,
        explorer: Option<EtherscanClient>,
        trade_threshold_usd: f64,
        block_batch_size: u64,
        initial_lookback_blocks: u64,
    ) -> Self {
        Self {
            chain,
            state,
            markets,
            explorer,
            trade_threshold_usd,
            block_batch_size,
            initial_lookback_blocks,
            block_ts_cache: HashMap::new(),
        }
    }

    /// Run one scan. With an explicit window both endpoints are resolved to
    /// blocks by binary search and no state is persisted; without one the
    /// scan continues from the persisted cursor and commits its progress on
    /// success.
    pub async fn scan(
        &mut self,
        window: Option<ScanWindow>,
        wallet_age_hours: f64,
    ) -> Result<Vec<AlertRecord>> {
        let mutate_state = window.is_none();
        self.block_ts_cache.clear();
        self.state.init()?;
        self.markets.init().await?;

        let head = self.chain.latest_block().await?;
        let (from_block, to_block) = match window {
            Some(w) => {
                let to = self
                    .find_block_by_timestamp(w.to.timestamp().max(0) as u64, head)
                    .await?;
                let from = self
                    .find_block_by_timestamp(w.from.timestamp().max(0) as u64, to)
                    .await?;
                (from, to)
            }
            None => {
                let last = self.state.last_processed_block();
                let from = if last == 0 {
                    head.saturating_sub(self.initial_lookback_blocks)
                } else {
                    last + 1
                };
                (from, head)
            }
        };

        if from_block > to_block {
            debug!(from_block, to_block, "Nothing to scan");
            return Ok(Vec::new());
        }

        info!(
            from_block,
            to_block,
            mutating = mutate_state,
            "Scanning exchange events"
        );
        let events = self.fetch_exchange_events(from_block, to_block).await?;
        let alerts = self
            .process_events(&events, wallet_age_hours, mutate_state)
            .await?;

        if mutate_state {
            self.state.set_last_processed_block(to_block);
            self.state.persist()?;
        }

        info!(
            events = events.len(),
            alerts = alerts.len(),
            "Scan complete"
        );
        Ok(alerts)
    }

    /// Walk the range in fixed-size chunks, then impose a total order. The
    /// per-chunk ordering the provider returns is irrelevant after the sort,
    /// so chunking is transparent to the output.
    async fn fetch_exchange_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ExchangeEvent>> {
        let step = self.block_batch_size.max(1);
        let mut all = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = (start + step - 1).min(to_block);
            let chunk = self.chain.exchange_events(start, end).await?;
            all.extend(chunk);
            start = end + 1;
        }
        all.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(all)
    }

    async fn process_events(
        &mut self,
        events: &[ExchangeEvent],
        wallet_age_hours: f64,
        mutate_state: bool,
    ) -> Result<Vec<AlertRecord>> {
        let mut alerts = Vec::new();

        for event in events {
            let Some(trade) = extract_trade_details(event) else {
                continue;
            };
            if trade.usd_value < self.trade_threshold_usd {
                continue;
            }

            // Tokens outside the tracked catalog are expected, not errors.
            let Some(info) = self.markets.get_token_info(&trade.token_id).await? else {
                continue;
            };

            let block_timestamp = self.block_timestamp(event.block_number).await?;
            let market = MarketRef {
                condition_id: info.condition_id.clone(),
                question: info.question.clone(),
                outcome: info.outcome.clone(),
                slug: info.slug.clone(),
                all_outcomes: Some(self.markets.get_outcomes(&info.condition_id)),
            };

            let wallet = match self.state.wallet(&trade.wallet).cloned() {
                Some(existing) => existing,
                None => {
                    let seeded = WalletState::first_trade(
                        event.block_number,
                        &trade.tx_hash,
                        trade.usd_value,
                        market.clone(),
                        trade.direction,
                        unix_to_datetime(block_timestamp),
                    );
                    if mutate_state {
                        self.state.upsert_wallet(&trade.wallet, seeded.clone());
                    }
                    seeded
                }
            };

            let first_activity = self
                .resolve_first_activity(&trade.wallet, &wallet, mutate_state)
                .await;

            if !is_new_wallet(block_timestamp, first_activity, wallet_age_hours) {
                continue;
            }
            let age_hours = wallet_age(block_timestamp, first_activity);

            let alert = AlertRecord {
                address: trade.wallet.clone(),
                tx_hash: trade.tx_hash.clone(),
                block_number: event.block_number,
                block_timestamp,
                usd_value: trade.usd_value,
                market,
                direction: trade.direction,
                created_at: Utc::now(),
                wallet_first_seen: format_local_time(first_activity),
                wallet_age_hours: age_hours,
            };
            info!(
                wallet = %alert.address,
                usd = alert.usd_value,
                direction = %alert.direction,
                age_hours = format!("{age_hours:.1}"),
                "New-wallet trade detected"
            );
            if mutate_state {
                self.state.add_alert(alert.clone());
            }
            alerts.push(alert);
        }

        Ok(alerts)
    }

    /// Best-known first-activity time, in priority order: a recorded explorer
    /// lookup, the recorded first-activity timestamp, a live explorer lookup
    /// (persisted in mutating mode; failures are logged and swallowed), and
    /// finally the moment the scanner itself first saw the wallet.
    async fn resolve_first_activity(
        &mut self,
        address: &str,
        wallet: &WalletState,
        mutate_state: bool,
    ) -> u64 {
        if let Some(record) = &wallet.explorer {
            return record.first_tx_timestamp;
        }
        if let Some(recorded) = wallet.first_activity_timestamp {
            return recorded;
        }

        if let Some(explorer) = self.explorer.as_mut() {
            match explorer.get_first_transaction_timestamp(address).await {
                Ok(Some(ts)) => {
                    if mutate_state {
                        let snapshot = wallet.clone();
                        self.state.update_wallet(address, move |current| {
                            let mut next = current.unwrap_or(snapshot);
                            next.explorer = Some(ExplorerRecord {
                                first_tx_timestamp: ts,
                                fetched_at: Utc::now(),
                            });
                            next.first_activity_timestamp = Some(ts);
                            next
                        });
                    }
                    return ts;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(wallet = %address, "Explorer lookup failed, falling back to first-seen age: {e}");
                }
            }
        }

        let fallback = wallet.first_seen_at.timestamp().max(0) as u64;
        if mutate_state {
            let snapshot = wallet.clone();
            self.state.update_wallet(address, move |current| {
                let mut next = current.unwrap_or(snapshot);
                // never lower an already-recorded first-activity time
                next.first_activity_timestamp.get_or_insert(fallback);
                next
            });
        }
        fallback
    }

    async fn block_timestamp(&mut self, number: u64) -> Result<u64> {
        if let Some(ts) = self.block_ts_cache.get(&number) {
            return Ok(*ts);
        }
        let ts = self.chain.block_timestamp(number).await?;
        self.block_ts_cache.insert(number, ts);
        Ok(ts)
    }

    /// Lowest block whose timestamp is >= `target_secs`, searching
    /// [0, upper_bound]. Assumes block timestamps are non-decreasing in
    /// block number.
    async fn find_block_by_timestamp(&mut self, target_secs: u64, upper_bound: u64) -> Result<u64> {
        let mut low = 0u64;
        let mut high = upper_bound;
        while low < high {
            let mid = low + (high - low) / 2;
            let ts = self.block_timestamp(mid).await?;
            if ts >= target_secs {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok(low)
    }
}

fn wallet_age(block_timestamp: u64, first_activity: u64) -> f64 {
    block_timestamp.saturating_sub(first_activity) as f64 / 3600.0
}

/// A wallet is "new" iff its age at trade time is within the cutoff,
/// inclusive at the boundary.
fn is_new_wallet(block_timestamp: u64, first_activity: u64, cutoff_hours: f64) -> bool {
    wallet_age(block_timestamp, first_activity) <= cutoff_hours
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::{MarketsPage, RawMarket, RawToken};
    use crate::types::TradeDirection;
    use async_trait::async_trait;
    use ethers::types::{Address, H256, U256};
    use std::path::Path;

    /// Blocks are 2 seconds apart starting at BASE_TS; events are returned
    /// in stored (arbitrary) order, filtered to the requested range.
    struct MockChain {
        head: u64,
        events: Vec<ExchangeEvent>,
    }

    const BASE_TS: u64 = 1_700_000_000;

    fn block_ts(number: u64) -> u64 {
        BASE_TS + number * 2
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn block_timestamp(&self, number: u64) -> Result<u64> {
            Ok(block_ts(number))
        }

        async fn exchange_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<ExchangeEvent>> {
            Ok(self
                .events
                .iter()
                .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                .cloned()
                .collect())
        }
    }

    /// One-page market source advertising token "111" (Yes) / "222" (No).
    struct StaticSource;

    #[async_trait]
    impl crate::markets::MarketSource for StaticSource {
        async fn fetch_page(&self, _cursor: &str) -> Result<MarketsPage> {
            Ok(MarketsPage {
                data: vec![RawMarket {
                    condition_id: "0xc1".to_string(),
                    question: "Will it rain?".to_string(),
                    market_slug: "will-it-rain".to_string(),
                    closed: false,
                    tokens: vec![
                        RawToken {
                            token_id: "111".to_string(),
                            outcome: "Yes".to_string(),
                        },
                        RawToken {
                            token_id: "222".to_string(),
                            outcome: "No".to_string(),
                        },
                    ],
                }],
                next_cursor: crate::config::END_CURSOR.to_string(),
            })
        }
    }

    fn buy_event(block_number: u64, log_index: u64, taker_byte: u8, usd: u64) -> ExchangeEvent {
        ExchangeEvent {
            block_number,
            log_index,
            tx_hash: H256::repeat_byte(taker_byte),
            taker: Address::repeat_byte(taker_byte),
            maker_asset_id: U256::from(111u64),
            taker_asset_id: U256::zero(),
            maker_amount_filled: U256::from(1u64),
            taker_amount_filled: U256::from(usd) * U256::exp10(6),
        }
    }

    fn tracker(
        dir: &Path,
        chain: MockChain,
        batch_size: u64,
    ) -> Tracker<MockChain, StaticSource> {
        let markets = MarketCache::new(StaticSource, dir.join("markets.json"), 6.0);
        let state = TrackingStore::new(dir.join("state.json"), 100);
        Tracker::new(chain, state, markets, None, 10_000.0, batch_size, 1_000)
    }

    #[tokio::test]
    async fn finds_lowest_block_at_or_after_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path(), MockChain { head: 1_000, events: vec![] }, 30);

        // exact hit
        let block = t.find_block_by_timestamp(block_ts(500), 1_000).await.unwrap();
        assert_eq!(block, 500);
        // between blocks 499 and 500: rounds up to the first block at/after
        let block = t
            .find_block_by_timestamp(block_ts(499) + 1, 1_000)
            .await
            .unwrap();
        assert_eq!(block, 500);
        // before genesis
        let block = t.find_block_by_timestamp(0, 1_000).await.unwrap();
        assert_eq!(block, 0);
    }

    #[tokio::test]
    async fn chunking_is_transparent_to_event_order() {
        let events = vec![
            // stored deliberately out of order
            buy_event(40, 2, 0x44, 20_000),
            buy_event(12, 7, 0x11, 20_000),
            buy_event(40, 1, 0x33, 20_000),
            buy_event(25, 0, 0x22, 20_000),
        ];

        let dir_small = tempfile::tempdir().unwrap();
        let mut small_chunks = tracker(
            dir_small.path(),
            MockChain { head: 50, events: events.clone() },
            1,
        );
        let dir_big = tempfile::tempdir().unwrap();
        let mut one_chunk = tracker(dir_big.path(), MockChain { head: 50, events }, 10_000);

        let a = small_chunks.scan(None, 48.0).await.unwrap();
        let b = one_chunk.scan(None, 48.0).await.unwrap();

        let order_a: Vec<_> = a.iter().map(|x| (x.block_number, x.tx_hash.clone())).collect();
        let order_b: Vec<_> = b.iter().map(|x| (x.block_number, x.tx_hash.clone())).collect();
        assert_eq!(order_a, order_b);
        assert_eq!(
            order_a.iter().map(|(b, _)| *b).collect::<Vec<_>>(),
            vec![12, 25, 40, 40]
        );
    }

    #[tokio::test]
    async fn young_wallet_over_threshold_raises_one_buy_alert() {
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xaa, 15_000);
        let event_ts = block_ts(100);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        // wallet first active two hours before the trade
        let wallet_key = format!("{:#x}", Address::repeat_byte(0xaa));
        t.state.init().unwrap();
        let mut seeded = WalletState::first_trade(
            90,
            "0xseed",
            15_000.0,
            MarketRef {
                condition_id: "0xc1".to_string(),
                question: "Will it rain?".to_string(),
                outcome: "Yes".to_string(),
                slug: "will-it-rain".to_string(),
                all_outcomes: None,
            },
            TradeDirection::Buy,
            unix_to_datetime(event_ts - 7_200),
        );
        seeded.first_activity_timestamp = Some(event_ts - 7_200);
        t.state.upsert_wallet(&wallet_key, seeded);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.address, wallet_key);
        assert_eq!(alert.direction, TradeDirection::Buy);
        assert!((alert.wallet_age_hours - 2.0).abs() < 0.01);
        assert_eq!(alert.market.question, "Will it rain?");
        assert_eq!(alert.market.outcome, "Yes");
        // mutating run advanced and persisted the cursor
        assert_eq!(t.state.last_processed_block(), 100);
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn old_wallet_is_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xaa, 15_000);
        let event_ts = block_ts(100);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        let wallet_key = format!("{:#x}", Address::repeat_byte(0xaa));
        t.state.init().unwrap();
        let mut seeded = WalletState::first_trade(
            1,
            "0xseed",
            15_000.0,
            MarketRef {
                condition_id: "0xc1".to_string(),
                question: "Will it rain?".to_string(),
                outcome: "Yes".to_string(),
                slug: "will-it-rain".to_string(),
                all_outcomes: None,
            },
            TradeDirection::Buy,
            unix_to_datetime(event_ts - 360_000),
        );
        // first active 100 hours before the trade, cutoff 48
        seeded.first_activity_timestamp = Some(event_ts - 360_000);
        t.state.upsert_wallet(&wallet_key, seeded);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn below_threshold_trades_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xaa, 9_999);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn unknown_token_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut event = buy_event(100, 0, 0xaa, 15_000);
        event.maker_asset_id = U256::from(999u64);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert!(alerts.is_empty());
        // the run still commits its progress
        assert_eq!(t.state.last_processed_block(), 100);
    }

    #[tokio::test]
    async fn fresh_wallet_falls_back_to_first_seen_and_alerts() {
        // no seeded record, no explorer: first activity = first observed,
        // age 0 → alert
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xbb, 15_000);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].wallet_age_hours.abs() < 0.01);

        // the fallback got recorded on the wallet
        let wallet_key = format!("{:#x}", Address::repeat_byte(0xbb));
        let record = t.state.wallet(&wallet_key).unwrap();
        assert_eq!(record.first_activity_timestamp, Some(block_ts(100)));
    }

    #[tokio::test]
    async fn explorer_record_is_never_overwritten_by_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xaa, 15_000);
        let event_ts = block_ts(100);
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![event] }, 30);

        let wallet_key = format!("{:#x}", Address::repeat_byte(0xaa));
        t.state.init().unwrap();
        let mut seeded = WalletState::first_trade(
            90,
            "0xseed",
            15_000.0,
            MarketRef {
                condition_id: "0xc1".to_string(),
                question: "Will it rain?".to_string(),
                outcome: "Yes".to_string(),
                slug: "will-it-rain".to_string(),
                all_outcomes: None,
            },
            TradeDirection::Buy,
            unix_to_datetime(event_ts),
        );
        let explorer_ts = event_ts - 3_600;
        seeded.explorer = Some(ExplorerRecord {
            first_tx_timestamp: explorer_ts,
            fetched_at: Utc::now(),
        });
        seeded.first_activity_timestamp = Some(explorer_ts);
        t.state.upsert_wallet(&wallet_key, seeded);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].wallet_age_hours - 1.0).abs() < 0.01);

        let record = t.state.wallet(&wallet_key).unwrap();
        assert_eq!(
            record.explorer.as_ref().unwrap().first_tx_timestamp,
            explorer_ts
        );
        assert_eq!(record.first_activity_timestamp, Some(explorer_ts));
    }

    #[tokio::test]
    async fn explicit_window_never_mutates_state() {
        let dir = tempfile::tempdir().unwrap();
        let event = buy_event(100, 0, 0xcc, 15_000);
        let mut t = tracker(dir.path(), MockChain { head: 200, events: vec![event] }, 30);

        let window = ScanWindow {
            from: unix_to_datetime(block_ts(50)),
            to: unix_to_datetime(block_ts(150)),
        };
        let alerts = t.scan(Some(window), 48.0).await.unwrap();
        assert_eq!(alerts.len(), 1);

        // read-only: cursor untouched, nothing persisted, no wallet record
        assert_eq!(t.state.last_processed_block(), 0);
        assert!(!dir.path().join("state.json").exists());
        let wallet_key = format!("{:#x}", Address::repeat_byte(0xcc));
        assert!(t.state.wallet(&wallet_key).is_none());
    }

    #[tokio::test]
    async fn inverted_resolved_range_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path(), MockChain { head: 100, events: vec![] }, 30);
        t.state.init().unwrap();
        // cursor already past the head
        t.state.set_last_processed_block(100);

        let alerts = t.scan(None, 48.0).await.unwrap();
        assert!(alerts.is_empty());
        assert_eq!(t.state.last_processed_block(), 100);
    }

    #[test]
    fn age_cutoff_is_inclusive_at_the_boundary() {
        let cutoff = 48.0;
        let block_ts = 1_700_000_000u64;
        let exactly_cutoff = block_ts - 48 * 3_600;
        let just_over = exactly_cutoff - 1;

        assert!(is_new_wallet(block_ts, exactly_cutoff, cutoff));
        assert!(!is_new_wallet(block_ts, just_over, cutoff));
    }

    #[test]
    fn future_first_activity_counts_as_age_zero() {
        assert!(is_new_wallet(1_700_000_000, 1_700_000_600, 1.0));
        assert_eq!(wallet_age(1_700_000_000, 1_700_000_600), 0.0);
    }
}
