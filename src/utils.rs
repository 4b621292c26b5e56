use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, TimeZone, Utc};
use ethers::types::{Address, U256};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Scale a fixed-point collateral amount to a float USD value.
pub fn units_to_usd(value: U256, decimals: u32) -> f64 {
    ethers::utils::format_units(value, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Full lowercased hex rendering, the canonical wallet-map key.
pub fn to_lower_address(address: &Address) -> String {
    format!("{address:#x}")
}

pub fn unix_to_datetime(secs: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Render a unix timestamp in the machine's local time for display strings.
pub fn format_local_time(secs: u64) -> String {
    match Local.timestamp_opt(secs as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M %z").to_string(),
        None => format!("unix:{secs}"),
    }
}

/// `$12,345.67`: two decimals for large stakes, up to four below $1000.
pub fn format_usd(value: f64) -> String {
    let decimals = if value >= 1000.0 { 2 } else { 4 };
    let fixed = format!("{value:.prec$}", prec = decimals);
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut frac = frac_part.to_string();
    while frac.len() > 2 && frac.ends_with('0') {
        frac.pop();
    }
    format!("${}.{frac}", group_thousands(int_part))
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Read and parse a JSON file. A missing file is the documented first-run
/// state, not an error.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Serialize to a temp file, then rename over the target so readers never
/// observe a half-written file. Output ends with a trailing newline.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_to_usd_scales_six_decimals() {
        let value = U256::from(15_000_000_000u64);
        let usd = units_to_usd(value, 6);
        assert!((usd - 15_000.0).abs() < 1e-9, "usd={usd}");
    }

    #[test]
    fn units_to_usd_keeps_fractional_part() {
        let value = U256::from(1_234_567u64);
        let usd = units_to_usd(value, 6);
        assert!((usd - 1.234567).abs() < 1e-9, "usd={usd}");
    }

    #[test]
    fn lower_address_is_full_width_lowercase() {
        let addr: Address = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E"
            .parse()
            .unwrap();
        assert_eq!(
            to_lower_address(&addr),
            "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e"
        );
    }

    #[test]
    fn format_usd_groups_thousands() {
        assert_eq!(format_usd(15_000.0), "$15,000.00");
        assert_eq!(format_usd(1_234_567.891), "$1,234,567.89");
    }

    #[test]
    fn format_usd_small_values_keep_precision() {
        assert_eq!(format_usd(15.5), "$15.50");
        assert_eq!(format_usd(15.5678), "$15.5678");
        assert_eq!(format_usd(999.1234), "$999.1234");
    }

    #[test]
    fn json_round_trip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");

        let missing: Option<Vec<u64>> = read_json_file(&path).unwrap();
        assert!(missing.is_none());

        write_json_file(&path, &vec![1u64, 2, 3]).unwrap();
        let loaded: Option<Vec<u64>> = read_json_file(&path).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with('\n'));
    }
}
