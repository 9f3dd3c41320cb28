//! Validation report bundling backtest metrics with the test battery.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use forecast_guard_backtest::BacktestMetrics;
use serde::{Deserialize, Serialize};

use crate::gate::GateDecision;
use crate::types::{StatisticalTestResult, Verdict};

/// Record handed to external persistence after a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    /// Forecaster under test
    pub forecaster: String,
    /// Forecaster used as the paired-loss baseline
    pub baseline: Option<String>,
    pub horizon: usize,
    pub symbols: Vec<String>,
    /// Metrics over test predictions pooled across symbols
    pub metrics: Option<BacktestMetrics>,
    pub mean_ic: f64,
    pub rank_ic: StatisticalTestResult,
    pub permutation: StatisticalTestResult,
    pub leakage_suspected: bool,
    pub diebold_mariano: StatisticalTestResult,
    pub gate: GateDecision,
}

impl ValidationReport {
    /// True when the gate passed and no leakage was suspected.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.gate.accepted && !self.leakage_suspected
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be represented in JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Validation of {} (horizon {}) over {} symbols",
            self.forecaster,
            self.horizon,
            self.symbols.len()
        );
        if let Some(baseline) = &self.baseline {
            let _ = writeln!(out, "  baseline: {baseline}");
        }
        if let Some(m) = &self.metrics {
            let _ = writeln!(
                out,
                "  accuracy: {:.2}%  sharpe: {:.2}  max drawdown: {:.2}%  trades: {}",
                m.accuracy * 100.0,
                m.sharpe_ratio,
                m.max_drawdown * 100.0,
                m.total_trades
            );
        }

        let _ = writeln!(out, "  mean IC: {:.4}", self.mean_ic);
        for result in [&self.rank_ic, &self.permutation, &self.diebold_mariano] {
            let _ = writeln!(out, "  {}", format_result(result));
        }
        if self.leakage_suspected {
            let _ = writeln!(out, "  WARNING: suspected data leakage");
        }

        let _ = writeln!(
            out,
            "  gate: {} ({:.0}% of symbols improved)",
            if self.is_accepted() { "ACCEPTED" } else { "REJECTED" },
            self.gate.pass_fraction * 100.0
        );
        for reason in &self.gate.reasons {
            let _ = writeln!(out, "    - {reason}");
        }
        out
    }
}

fn format_result(result: &StatisticalTestResult) -> String {
    match result.verdict {
        Verdict::InsufficientSample => {
            format!("{}: {}", result.test_name, result.interpretation)
        }
        Verdict::Significant | Verdict::NotSignificant => format!(
            "{}: statistic {:.3}, p = {:.4} ({})",
            result.test_name, result.statistic, result.p_value, result.interpretation
        ),
    }
}
