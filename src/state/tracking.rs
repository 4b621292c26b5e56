use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::types::{AlertRecord, TrackingState, WalletState};
use crate::utils::{read_json_file, write_json_file};

/// Exclusive owner of the persisted tracker state. The scan engine reads and
/// mutates the state only through these accessors; nothing else writes the
/// file.
pub struct TrackingStore {
    path: PathBuf,
    max_alerts: usize,
    data: TrackingState,
    loaded: bool,
}

impl TrackingStore {
    pub fn new(path: PathBuf, max_alerts: usize) -> Self {
        Self {
            path,
            max_alerts,
            data: TrackingState::default(),
            loaded: false,
        }
    }

    /// Idempotent load-or-default. A missing file is the first-run state.
    /// Legacy wallet records without a first-activity timestamp are
    /// back-filled from their first-seen time.
    pub fn init(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.data = read_json_file::<TrackingState>(&self.path)?.unwrap_or_default();
        for wallet in self.data.wallets.values_mut() {
            if wallet.first_activity_timestamp.is_none() {
                wallet.first_activity_timestamp =
                    Some(wallet.first_seen_at.timestamp().max(0) as u64);
            }
        }
        self.loaded = true;
        Ok(())
    }

    pub fn last_processed_block(&self) -> u64 {
        self.data.last_processed_block
    }

    /// Monotonic: setting a value at or below the current cursor is a no-op.
    pub fn set_last_processed_block(&mut self, block: u64) {
        if block > self.data.last_processed_block {
            self.data.last_processed_block = block;
        }
    }

    pub fn wallet(&self, address: &str) -> Option<&WalletState> {
        self.data.wallets.get(&address.to_lowercase())
    }

    pub fn upsert_wallet(&mut self, address: &str, state: WalletState) {
        self.data.wallets.insert(address.to_lowercase(), state);
    }

    /// Read-modify-write against the current record (absent if none). The
    /// transformation's return value becomes the stored record.
    pub fn update_wallet(
        &mut self,
        address: &str,
        mutate: impl FnOnce(Option<WalletState>) -> WalletState,
    ) -> WalletState {
        let key = address.to_lowercase();
        let next = mutate(self.data.wallets.get(&key).cloned());
        self.data.wallets.insert(key, next.clone());
        next
    }

    /// Append one alert, then trim from the front to the cap so the oldest
    /// records are the ones dropped.
    pub fn add_alert(&mut self, alert: AlertRecord) {
        self.data.alerts.push(alert);
        if self.data.alerts.len() > self.max_alerts {
            let excess = self.data.alerts.len() - self.max_alerts;
            self.data.alerts.drain(0..excess);
        }
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.data.alerts
    }

    /// Rewrite the state file wholesale. Alerts are sorted ascending by
    /// creation time so the file contents are deterministic regardless of
    /// insertion order. Calling this before `init` is a caller ordering bug.
    pub fn persist(&self) -> Result<()> {
        if !self.loaded {
            return Err(AppError::State(
                "tracking store must be initialised before persisting".to_string(),
            ));
        }
        let mut snapshot = self.data.clone();
        snapshot.alerts.sort_by_key(|a| a.created_at);
        write_json_file(&self.path, &snapshot)
    }
}
