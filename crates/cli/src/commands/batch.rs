//! Multi-symbol batch command.
//!
//! Runs every symbol through the batch runner, then validates the pooled
//! test predictions. A baseline forecaster (no-change unless `--baseline`
//! says otherwise) is run over the same symbols for the paired-loss test.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use forecast_guard_backtest::{
    BatchReport, BatchRunner, CsvBarStore, NoChangeForecaster, PersistenceForecaster,
    SharedFeatureCache, WalkForwardEngine,
};
use forecast_guard_core::{ForecasterAdapter, ForecasterFactory, GuardConfig};
use forecast_guard_features::FeatureCache;
use parking_lot::Mutex;
use forecast_guard_monitor::{DivergenceMonitor, DivergenceSummary};
use forecast_guard_validation::{StatisticalValidator, ValidationReport};
use serde::Serialize;

use super::{OutputFormat, WindowArgs};

/// Forecaster the model is compared against in the paired-loss test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum BaselineKind {
    /// Predicts a zero return at every origin
    #[default]
    NoChange,
    /// Repeats the direction of the last `--baseline-lookback` bars
    Persistence,
    /// Skip the paired-loss test
    None,
}

impl std::fmt::Display for BaselineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaselineKind::NoChange => write!(f, "no-change"),
            BaselineKind::Persistence => write!(f, "persistence"),
            BaselineKind::None => write!(f, "none"),
        }
    }
}

/// Arguments for the batch command.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Comma-separated symbols to evaluate
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// Baseline for the paired-loss test: no-change, persistence, or none
    #[arg(long, default_value = "no-change", value_enum)]
    pub baseline: BaselineKind,

    /// Lookback of the persistence baseline, in bars
    #[arg(long, default_value = "5")]
    pub baseline_lookback: usize,

    /// Seed for the permutation test
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Debug, Serialize)]
struct BatchOutput<'a> {
    batch: &'a BatchReport,
    divergence: Option<DivergenceSummary>,
    validation: Option<&'a ValidationReport>,
}

/// Persistence forecasters sharing one feature cache across symbols and
/// windows.
fn persistence_factory(
    lookback: usize,
    neutral_band: f64,
    timeframe: &str,
    cache: &SharedFeatureCache,
) -> Arc<dyn ForecasterFactory> {
    let timeframe = timeframe.to_string();
    let cache = Arc::clone(cache);
    Arc::new(move |symbol: &str| {
        Box::new(
            PersistenceForecaster::new(lookback, neutral_band).with_cache(
                Arc::clone(&cache),
                symbol,
                &timeframe,
            ),
        ) as Box<dyn ForecasterAdapter>
    })
}

fn no_change_factory(neutral_band: f64) -> Arc<dyn ForecasterFactory> {
    Arc::new(move |_: &str| {
        Box::new(NoChangeForecaster::new(neutral_band)) as Box<dyn ForecasterAdapter>
    })
}

fn runner(
    config: &GuardConfig,
    store: &Arc<CsvBarStore>,
    factory: Arc<dyn ForecasterFactory>,
) -> BatchRunner {
    BatchRunner::new(
        store.clone(),
        factory,
        WalkForwardEngine::new(config.walk_forward.clone(), config.features.neutral_band),
        config.divergence.clone(),
        config.batch.clone(),
    )
}

async fn run_with_interrupt(
    runner: &BatchRunner,
    symbols: &[String],
    monitor: &mut DivergenceMonitor,
) -> Result<BatchReport> {
    let cancel = runner.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling remaining symbols");
            cancel.cancel();
        }
    });
    let result = runner.run(symbols, monitor).await;
    interrupt.abort();
    result
}

pub async fn run_batch(args: BatchArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.window.format)?;
    let mut config = args.window.load_config()?;
    if args.seed.is_some() {
        config.statistics.permutation_seed = args.seed;
    }

    let store = Arc::new(CsvBarStore::new(args.window.data_dir.clone()));
    tracing::info!(
        symbols = args.symbols.len(),
        workers = config.batch.workers,
        timeframe = %args.window.timeframe,
        "Starting batch"
    );

    let mut batch_config = config.clone();
    batch_config.batch.timeframe = args.window.timeframe.clone();

    let neutral_band = config.features.neutral_band;
    let cache: SharedFeatureCache = Arc::new(Mutex::new(FeatureCache::new()));
    let model_factory =
        persistence_factory(args.window.lookback, neutral_band, &args.window.timeframe, &cache);

    let mut monitor = DivergenceMonitor::new(config.divergence.clone());
    let model = run_with_interrupt(
        &runner(&batch_config, &store, model_factory),
        &args.symbols,
        &mut monitor,
    )
    .await?;

    let baseline_factory = match args.baseline {
        BaselineKind::NoChange => Some(no_change_factory(neutral_band)),
        BaselineKind::Persistence => Some(persistence_factory(
            args.baseline_lookback,
            neutral_band,
            &args.window.timeframe,
            &cache,
        )),
        BaselineKind::None => None,
    };
    let baseline = match baseline_factory {
        Some(factory) => {
            tracing::info!(baseline = %args.baseline, "Running baseline");
            let mut scratch = DivergenceMonitor::new(config.divergence.clone());
            let report = run_with_interrupt(
                &runner(&batch_config, &store, factory),
                &args.symbols,
                &mut scratch,
            )
            .await?;
            report.reports
        }
        None => Vec::new(),
    };
    let stats = cache.lock().stats();
    tracing::debug!(hits = stats.hits, misses = stats.misses, "Feature cache usage");

    let validation = if model.reports.is_empty() {
        tracing::warn!("No symbol completed; skipping validation");
        None
    } else {
        let validator = StatisticalValidator::new(config.statistics.clone());
        Some(validator.validate(
            &model.reports,
            &baseline,
            config.walk_forward.periods_per_year,
        )?)
    };
    let divergence = (!monitor.is_empty()).then(|| monitor.summarize(None));

    match format {
        OutputFormat::Text => {
            for report in &model.reports {
                print!("{}", report.to_text());
            }
            for failure in &model.failures {
                println!("FAILED {}: {}", failure.symbol, failure.reason);
            }
            if !model.cancelled.is_empty() {
                println!("Cancelled: {}", model.cancelled.join(", "));
            }
            if let Some(summary) = &divergence {
                println!(
                    "Divergence: {} windows, {:.1}% overfitting, mean {:.4}, max {:.4}",
                    summary.window_count,
                    summary.pct_overfitting,
                    summary.mean_divergence,
                    summary.max_divergence
                );
            }
            if let Some(validation) = &validation {
                print!("{}", validation.to_text());
            }
        }
        OutputFormat::Json => {
            let output = BatchOutput {
                batch: &model,
                divergence,
                validation: validation.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
