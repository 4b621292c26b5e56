use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::chain::RpcChain;
use crate::config::{Config, ETHERSCAN_CHAIN, MAX_SCAN_WINDOW_HOURS};
use crate::error::{AppError, Result};
use crate::explorer::EtherscanClient;
use crate::markets::{ClobMarketSource, MarketCache};
use crate::state::TrackingStore;
use crate::tracker::{ScanWindow, Tracker};
use crate::types::{AlertRecord, TradeDirection};
use crate::utils::{ensure_dir, format_local_time, format_usd};

/// How the scan window is chosen. `Incremental` continues from the persisted
/// cursor and commits progress; the other modes are read-only what-if scans
/// over an explicit window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    Incremental,
    Recent { minutes: i64 },
    CalendarDay { date: NaiveDate },
    Custom { from: DateTime<Utc>, to: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: ScanMode,
    /// Overrides the configured wallet-age cutoff for this run.
    pub wallet_age_hours: Option<f64>,
    pub save_log: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::Incremental,
            wallet_age_hours: None,
            save_log: true,
        }
    }
}

impl RunOptions {
    /// Entry-point glue: scan mode and overrides from environment variables.
    pub fn from_env() -> Result<Self> {
        let mode = match std::env::var("SCAN_MODE").as_deref().unwrap_or("incremental") {
            "incremental" => ScanMode::Incremental,
            "recent" => ScanMode::Recent {
                minutes: std::env::var("RECENT_MINUTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            },
            "calendar-day" => {
                let raw = std::env::var("SCAN_DAY").map_err(|_| {
                    AppError::Validation("SCAN_DAY is required for calendar-day scans".to_string())
                })?;
                let date = raw.parse::<NaiveDate>().map_err(|_| {
                    AppError::Validation(format!("SCAN_DAY is not a valid date: {raw}"))
                })?;
                ScanMode::CalendarDay { date }
            }
            "custom-range" => ScanMode::Custom {
                from: parse_rfc3339_env("SCAN_FROM")?,
                to: parse_rfc3339_env("SCAN_TO")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "Unsupported scan mode: {other}"
                )))
            }
        };

        Ok(Self {
            mode,
            wallet_age_hours: std::env::var("WALLET_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok()),
            save_log: std::env::var("SAVE_RUN_LOG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        })
    }
}

fn parse_rfc3339_env(key: &str) -> Result<DateTime<Utc>> {
    let raw = std::env::var(key)
        .map_err(|_| AppError::Validation(format!("{key} is required for custom-range scans")))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::Validation(format!("{key} is not a valid RFC 3339 time: {raw}")))
}

/// An alert plus the presentation-only fields the display layers render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedAlert {
    #[serde(flatten)]
    pub alert: AlertRecord,
    pub summary: String,
    pub market_url: String,
    pub direction_text: String,
    pub stake: String,
    pub block_local: String,
    pub implied_position: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct TrackerRunResult {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub alerts: Vec<EnrichedAlert>,
    pub log_lines: Vec<String>,
    pub log_path: Option<PathBuf>,
}

/// Validate the requested mode and resolve it into an explicit UTC window.
/// `Incremental` yields no window (the tracker uses its persisted cursor).
/// All failures here happen before any network access.
pub fn normalize_window(mode: &ScanMode) -> Result<Option<ScanWindow>> {
    let max_span = Duration::hours(MAX_SCAN_WINDOW_HOURS);
    match mode {
        ScanMode::Incremental => Ok(None),
        ScanMode::Recent { minutes } => {
            if *minutes <= 0 {
                return Err(AppError::Validation(
                    "Recent scan needs a positive number of minutes".to_string(),
                ));
            }
            if Duration::minutes(*minutes) > max_span {
                return Err(AppError::Validation(
                    "Recent scan cannot exceed 24 hours".to_string(),
                ));
            }
            let to = Utc::now();
            Ok(Some(ScanWindow {
                from: to - Duration::minutes(*minutes),
                to,
            }))
        }
        ScanMode::CalendarDay { date } => {
            let from = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| AppError::Validation("Invalid calendar day".to_string()))?
                .and_utc();
            Ok(Some(ScanWindow {
                from,
                to: from + Duration::days(1),
            }))
        }
        ScanMode::Custom { from, to } => {
            if to < from {
                return Err(AppError::Validation(
                    "The end time must be after the start time".to_string(),
                ));
            }
            if *to - *from > max_span {
                return Err(AppError::Validation(
                    "Scan window cannot exceed 24 hours".to_string(),
                ));
            }
            Ok(Some(ScanWindow { from: *from, to: *to }))
        }
    }
}

/// Run one full scan: validate the window, wire up the components, scan,
/// enrich the alerts, and optionally write the run log.
pub async fn run_tracker(cfg: &Config, options: RunOptions) -> Result<TrackerRunResult> {
    let window = normalize_window(&options.mode)?;

    let chain = RpcChain::new(&cfg.polygon_rpc_url, cfg.exchange_address)?;
    let markets = MarketCache::new(
        ClobMarketSource::new(cfg.clob_api_url.clone())?,
        cfg.markets_cache_file.clone(),
        cfg.markets_cache_ttl_hours,
    );
    let state = TrackingStore::new(cfg.state_file.clone(), cfg.max_alert_history);
    let explorer = match &cfg.etherscan_api_key {
        Some(key) => Some(EtherscanClient::new(
            key.clone(),
            StdDuration::from_millis(cfg.etherscan_rate_limit_ms),
            ETHERSCAN_CHAIN.to_string(),
        )?),
        None => None,
    };

    let mut tracker = Tracker::new(
        chain,
        state,
        markets,
        explorer,
        cfg.trade_threshold_usd,
        cfg.block_batch_size,
        cfg.initial_lookback_blocks,
    );

    let wallet_age_cutoff = options.wallet_age_hours.unwrap_or(cfg.wallet_max_age_hours);
    let alerts = tracker.scan(window, wallet_age_cutoff).await?;
    let timestamp = Utc::now();

    let enriched: Vec<EnrichedAlert> = alerts.iter().map(enrich_alert).collect();

    let base_message = if enriched.is_empty() {
        "No newly created wallets exceeded the configured trade threshold.".to_string()
    } else {
        format!(
            "[ALERT] Detected {} high-value trades from newly created wallets.",
            enriched.len()
        )
    };
    let message = match &window {
        Some(w) => format!(
            "{base_message} (window: {} to {})",
            w.from.to_rfc3339(),
            w.to.to_rfc3339()
        ),
        None => base_message,
    };

    let mut log_lines = vec![timestamp.to_rfc3339(), message.clone()];
    if let Some(w) = &window {
        log_lines.push(format!(
            "Requested window: {} to {}",
            w.from.to_rfc3339(),
            w.to.to_rfc3339()
        ));
    }
    log_lines.push(format!("Wallet age cutoff: {wallet_age_cutoff} hours"));
    for alert in &enriched {
        log_lines.push(
            [
                alert.summary.clone(),
                format!("Transaction: {}", alert.alert.tx_hash),
                format!("Direction: {}", alert.direction_text),
                format!("Implied Position: {}", alert.implied_position),
                format!(
                    "Wallet First Seen: {} ({:.1} hours old)",
                    alert.alert.wallet_first_seen, alert.alert.wallet_age_hours
                ),
                format!(
                    "Market: {} -> {}",
                    alert.alert.market.question, alert.alert.market.outcome
                ),
                format!("Stake: {} {}", alert.stake, alert.currency),
                format!(
                    "Block: {} @ {}",
                    alert.alert.block_number, alert.block_local
                ),
                format!("Slug: {}", alert.alert.market.slug),
                format!("Link: {}", alert.market_url),
            ]
            .join("\n"),
        );
        log_lines.push("-".repeat(80));
    }

    let log_path = if options.save_log {
        let path = write_run_log(&cfg.scan_log_dir, timestamp, &log_lines)?;
        info!(path = %path.display(), "Run log written");
        Some(path)
    } else {
        None
    };

    Ok(TrackerRunResult {
        timestamp,
        message,
        alerts: enriched,
        log_lines,
        log_path,
    })
}

fn enrich_alert(alert: &AlertRecord) -> EnrichedAlert {
    let stake = format_usd(alert.usd_value);
    let will_happen = alert.direction == TradeDirection::Buy;
    let block_local = format_local_time(alert.block_timestamp);

    let all_outcomes = alert.market.all_outcomes.clone().unwrap_or_default();
    let mut alternatives: Vec<String> = all_outcomes
        .into_iter()
        .filter(|name| name != &alert.market.outcome)
        .collect();
    if alternatives.is_empty() {
        alternatives = infer_alternatives(&alert.market.question, &alert.market.outcome);
    }

    let alt_label = if alternatives.is_empty() {
        "alternative outcome(s)".to_string()
    } else {
        let quoted: Vec<String> = alternatives.iter().map(|o| format!("\"{o}\"")).collect();
        let separator = if quoted.len() > 2 { ", " } else { " and " };
        quoted.join(separator)
    };

    let implied_position = if will_happen {
        format!("Backing \"{}\"", alert.market.outcome)
    } else {
        format!("Backing {alt_label}")
    };

    let summary = if will_happen {
        format!(
            "Wallet {} bet {} USDC that \"{}\" will happen in \"{}\".",
            alert.address, stake, alert.market.outcome, alert.market.question
        )
    } else {
        format!(
            "Wallet {} bet {} USDC that \"{}\" will NOT happen in \"{}\".",
            alert.address, stake, alert.market.outcome, alert.market.question
        )
    };

    EnrichedAlert {
        summary,
        stake,
        direction_text: if will_happen {
            format!("FOR {}", alert.market.outcome)
        } else {
            format!("AGAINST {}", alert.market.outcome)
        },
        block_local,
        implied_position,
        currency: "USDC".to_string(),
        market_url: format!("https://polymarket.com/market/{}", alert.market.slug),
        alert: alert.clone(),
    }
}

/// Yes/No markets imply each other; "A vs. B" questions imply the other
/// side. Anything else has no inferable alternative.
fn infer_alternatives(question: &str, outcome: &str) -> Vec<String> {
    let normalized = outcome.trim().to_lowercase();
    if normalized == "yes" {
        return vec!["No".to_string()];
    }
    if normalized == "no" {
        return vec!["Yes".to_string()];
    }

    let mut parts = question.splitn(2, " vs ");
    let (team_a, team_b) = match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => (a.trim(), b.trim()),
        _ => {
            let mut parts = question.splitn(2, " vs. ");
            match (parts.next(), parts.next()) {
                (Some(a), Some(b)) => (a.trim(), b.trim()),
                _ => return Vec::new(),
            }
        }
    };

    if team_a.to_lowercase() == normalized && !team_b.is_empty() {
        return vec![team_b.to_string()];
    }
    if team_b.to_lowercase() == normalized && !team_a.is_empty() {
        return vec![team_a.to_string()];
    }
    Vec::new()
}

fn write_run_log(dir: &Path, timestamp: DateTime<Utc>, lines: &[String]) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let safe_timestamp = timestamp.to_rfc3339().replace([':', '.'], "-");
    let path = dir.join(format!("scan-{safe_timestamp}.txt"));
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(&path, body)?;
    Ok(path)
}
