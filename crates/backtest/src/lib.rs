//! Walk-forward evaluation of pluggable forecasters.

pub mod baseline;
pub mod batch;
pub mod data_provider;
pub mod engine;
pub mod metrics;
pub mod report;
pub mod window;

pub use baseline::{NoChangeForecaster, PersistenceForecaster, SharedFeatureCache};
pub use batch::{BatchReport, BatchRunner, CancellationFlag, SymbolFailure};
pub use data_provider::{CsvBarStore, InMemoryBarStore};
pub use engine::WalkForwardEngine;
pub use metrics::{
    classification_error, first_forecast_per_origin, max_drawdown, sharpe_ratio, sortino_ratio,
    BacktestMetrics, ClassMetrics, PredictionOutcome,
};
pub use report::{RunSummary, SkippedWindow, WalkForwardReport, WindowOutcome};
pub use window::{Window, WindowGenerator, WindowMode};
