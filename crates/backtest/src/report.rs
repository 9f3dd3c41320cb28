//! Per-run reporting: every attempted window is either an outcome or a
//! skip with its reason.

use std::fmt::Write as _;

use forecast_guard_core::ErrorKind;
use forecast_guard_monitor::DivergenceRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::{first_forecast_per_origin, BacktestMetrics, PredictionOutcome};
use crate::window::{Window, WindowMode};

/// Result of one successfully evaluated window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window: Window,
    pub training_samples: usize,
    pub train_error: Option<f64>,
    pub validation_error: Option<f64>,
    pub test_error: f64,
    pub validation_predictions: Vec<PredictionOutcome>,
    pub test_predictions: Vec<PredictionOutcome>,
    pub divergence: Option<DivergenceRecord>,
    pub elapsed_ms: u64,
}

/// A window that was attempted but contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedWindow {
    pub window_id: usize,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub run_id: Uuid,
    pub symbol: String,
    pub forecaster: String,
    pub mode: WindowMode,
    pub horizon: usize,
    pub windows: Vec<WindowOutcome>,
    pub skipped: Vec<SkippedWindow>,
    pub summary: RunSummary,
    /// Metrics over pooled test predictions; `None` if no window succeeded.
    pub metrics: Option<BacktestMetrics>,
}

impl WalkForwardReport {
    /// Test predictions from every successful window, in window order.
    #[must_use]
    pub fn pooled_test_predictions(&self) -> Vec<PredictionOutcome> {
        self.windows
            .iter()
            .flat_map(|w| w.test_predictions.iter().copied())
            .collect()
    }

    /// Test predictions with one entry per forecast origin, in bar order.
    ///
    /// Identical to [`Self::pooled_test_predictions`] unless test windows
    /// overlap.
    #[must_use]
    pub fn origin_test_predictions(&self) -> Vec<PredictionOutcome> {
        first_forecast_per_origin(self.windows.iter().flat_map(|w| &w.test_predictions))
    }

    #[must_use]
    pub fn divergence_records(&self) -> Vec<&DivergenceRecord> {
        self.windows.iter().filter_map(|w| w.divergence.as_ref()).collect()
    }

    /// Formats a plain-text summary listing every skipped window.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Walk-forward run {} ({})", self.run_id, self.symbol);
        let _ = writeln!(
            out,
            "  forecaster: {}  mode: {:?}  horizon: {}",
            self.forecaster, self.mode, self.horizon
        );
        let _ = writeln!(
            out,
            "  windows attempted: {}  succeeded: {}  skipped: {}",
            self.summary.attempted, self.summary.succeeded, self.summary.skipped
        );

        if let Some(m) = &self.metrics {
            let _ = writeln!(
                out,
                "  accuracy: {:.2}%  f1: {:.3}  sharpe: {:.2}  sortino: {:.2}  max drawdown: {:.2}%",
                m.accuracy * 100.0,
                m.f1,
                m.sharpe_ratio,
                m.sortino_ratio,
                m.max_drawdown * 100.0
            );
            let _ = writeln!(
                out,
                "  trades: {}  win rate: {:.2}%  profit factor: {}",
                m.total_trades,
                m.win_rate * 100.0,
                m.profit_factor
                    .map_or_else(|| "n/a".to_string(), |pf| format!("{pf:.2}"))
            );
        }

        let overfit = self
            .divergence_records()
            .iter()
            .filter(|r| r.is_overfitting)
            .count();
        if self.mode == WindowMode::ThreeWay {
            let _ = writeln!(out, "  overfitting windows: {overfit}");
        }

        for skip in &self.skipped {
            let _ = writeln!(
                out,
                "  skipped window {}: {:?} - {}",
                skip.window_id, skip.kind, skip.reason
            );
        }
        out
    }
}
