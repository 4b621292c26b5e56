mod chain;
mod config;
mod error;
mod explorer;
mod markets;
mod runner;
mod state;
mod tracker;
mod types;
mod utils;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::runner::{run_tracker, RunOptions};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let options = RunOptions::from_env()?;
    info!(mode = ?options.mode, "Starting tracker run");

    let result = run_tracker(&cfg, options).await?;

    info!("{}", result.message);
    for alert in &result.alerts {
        info!("{}", alert.summary);
    }
    match &result.log_path {
        Some(path) => info!("Run log: {}", path.display()),
        // no log file requested, echo the full report to stdout instead
        None => {
            for line in &result.log_lines {
                println!("{line}");
            }
        }
    }
    info!(
        finished_at = %result.timestamp,
        alerts = result.alerts.len(),
        "Tracker run complete"
    );

    Ok(())
}
