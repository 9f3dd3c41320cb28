//! Single-symbol walk-forward command.
//!
//! Loads bars from a CSV directory, runs the persistence forecaster through
//! the walk-forward engine and prints the run report.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use forecast_guard_backtest::{
    CsvBarStore, PersistenceForecaster, WalkForwardEngine, WalkForwardReport,
};
use forecast_guard_core::BarStore;
use forecast_guard_features::FeatureCache;
use forecast_guard_monitor::{DivergenceMonitor, DivergenceSummary};
use serde::Serialize;

use super::{OutputFormat, WindowArgs};

/// Arguments for the walk-forward command.
#[derive(Args, Debug, Clone)]
pub struct WalkForwardArgs {
    /// Symbol to evaluate
    #[arg(long)]
    pub symbol: String,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Debug, Serialize)]
struct WalkForwardOutput<'a> {
    report: &'a WalkForwardReport,
    /// Present for three-way runs only
    divergence: Option<DivergenceSummary>,
}

pub async fn run_walk_forward(args: WalkForwardArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.window.format)?;
    let config = args.window.load_config()?;

    let store = CsvBarStore::new(args.window.data_dir.clone());
    let bars = store
        .fetch(&args.symbol, &args.window.timeframe, config.batch.bar_limit)
        .await?;
    tracing::info!(
        symbol = %args.symbol,
        bars = bars.len(),
        train = config.walk_forward.train_size,
        test = config.walk_forward.test_size,
        step = config.walk_forward.step,
        "Starting walk-forward run"
    );

    let neutral_band = config.features.neutral_band;
    let engine = WalkForwardEngine::new(config.walk_forward.clone(), neutral_band);
    let cache = Arc::new(parking_lot::Mutex::new(FeatureCache::new()));
    let mut forecaster = PersistenceForecaster::new(args.window.lookback, neutral_band)
        .with_cache(Arc::clone(&cache), &args.symbol, &args.window.timeframe);
    let mut monitor = DivergenceMonitor::new(config.divergence.clone());

    let report = engine.run(&args.symbol, &bars, &mut forecaster, Some(&mut monitor))?;
    let divergence = (!monitor.is_empty()).then(|| monitor.summarize(None));
    let stats = cache.lock().stats();
    tracing::debug!(hits = stats.hits, misses = stats.misses, "Feature cache usage");

    match format {
        OutputFormat::Text => {
            print!("{}", report.to_text());
            if let Some(summary) = &divergence {
                println!(
                    "Divergence: {} windows, {:.1}% overfitting, mean {:.4}, max {:.4}",
                    summary.window_count,
                    summary.pct_overfitting,
                    summary.mean_divergence,
                    summary.max_divergence
                );
            }
        }
        OutputFormat::Json => {
            let output = WalkForwardOutput {
                report: &report,
                divergence,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{window_args, write_series};

    #[tokio::test]
    async fn test_three_way_run_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "SPY", 300, 0.0);
        let mut window = window_args(dir.path());
        window.validation = Some(20);
        window.format = "json".to_string();

        let args = WalkForwardArgs {
            symbol: "SPY".to_string(),
            window,
        };
        run_walk_forward(args).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_csv_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = WalkForwardArgs {
            symbol: "NOPE".to_string(),
            window: window_args(dir.path()),
        };
        assert!(run_walk_forward(args).await.is_err());
    }
}
