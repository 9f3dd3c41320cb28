//! Divergence between validation and test error as an overfitting proxy.
//!
//! # Formula
//!
//! ```text
//! divergence = |validation_error - test_error| / validation_error   (validation_error > 0)
//!            = 0                                                    (otherwise)
//! ```
//!
//! This is the only divergence definition used across the workspace. It is
//! not interchangeable with a train-vs-validation accuracy gap.

use chrono::{DateTime, Duration, Utc};
use forecast_guard_core::DivergenceConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Alert severity for a single divergence observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

/// Slack applied to every threshold comparison. Divergence is a ratio of
/// floating-point errors, so a value that is on a threshold in exact
/// arithmetic can land a few ulps above it.
pub const THRESHOLD_TOLERANCE: f64 = 1e-9;

/// Computes the divergence ratio. Inputs must already be finite.
#[must_use]
pub fn compute_divergence(validation_error: f64, test_error: f64) -> f64 {
    if validation_error > 0.0 {
        (validation_error - test_error).abs() / validation_error
    } else {
        0.0
    }
}

/// Where an observation came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceContext {
    pub symbol: String,
    pub horizon: usize,
    pub window_id: usize,
    pub train_error: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl DivergenceContext {
    #[must_use]
    pub fn new(symbol: impl Into<String>, horizon: usize, window_id: usize) -> Self {
        Self {
            symbol: symbol.into(),
            horizon,
            window_id,
            train_error: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_train_error(mut self, train_error: f64) -> Self {
        self.train_error = Some(train_error);
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A single, immutable divergence observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub symbol: String,
    pub horizon: usize,
    pub window_id: usize,
    pub train_error: Option<f64>,
    pub validation_error: f64,
    pub test_error: f64,
    pub divergence: f64,
    pub is_overfitting: bool,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over recorded divergences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSummary {
    pub window_count: usize,
    /// Percentage (0-100) of windows flagged as overfitting.
    pub pct_overfitting: f64,
    pub mean_divergence: f64,
    pub min_divergence: f64,
    pub max_divergence: f64,
    pub std_divergence: f64,
}

/// Process-scoped divergence history.
///
/// The history is append-only. Workers may each own a monitor and merge
/// their records into a shared one afterwards.
#[derive(Debug, Clone, Default)]
pub struct DivergenceMonitor {
    config: DivergenceConfig,
    history: Vec<DivergenceRecord>,
}

impl DivergenceMonitor {
    #[must_use]
    pub fn new(config: DivergenceConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DivergenceConfig {
        &self.config
    }

    /// Classifies a divergence: normal below the warning threshold, critical
    /// above the critical threshold, warning in between. Both bounds are
    /// compared within [`THRESHOLD_TOLERANCE`].
    #[must_use]
    pub fn classify(&self, divergence: f64) -> Severity {
        if divergence > self.config.alert_critical_threshold + THRESHOLD_TOLERANCE {
            Severity::Critical
        } else if divergence >= self.config.alert_warning_threshold - THRESHOLD_TOLERANCE {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }

    /// Overfitting iff divergence is strictly above the acceptance threshold
    /// by more than [`THRESHOLD_TOLERANCE`].
    #[must_use]
    pub fn is_overfitting(&self, divergence: f64) -> bool {
        divergence > self.config.divergence_threshold + THRESHOLD_TOLERANCE
    }

    /// Records a new observation and returns it.
    ///
    /// Non-finite errors are coerced to 0 with a warning so monitoring keeps
    /// running on bad input.
    pub fn record(
        &mut self,
        validation_error: f64,
        test_error: f64,
        context: DivergenceContext,
    ) -> DivergenceRecord {
        let validation_error = finite_or_zero("validation_error", validation_error, &context);
        let test_error = finite_or_zero("test_error", test_error, &context);
        let divergence = finite_or_zero(
            "divergence",
            compute_divergence(validation_error, test_error),
            &context,
        );

        let severity = self.classify(divergence);
        let is_overfitting = self.is_overfitting(divergence);

        let record = DivergenceRecord {
            symbol: context.symbol,
            horizon: context.horizon,
            window_id: context.window_id,
            train_error: context.train_error.filter(|e| e.is_finite()),
            validation_error,
            test_error,
            divergence,
            is_overfitting,
            severity,
            timestamp: context.timestamp,
        };

        match severity {
            Severity::Critical => warn!(
                symbol = %record.symbol,
                window_id = record.window_id,
                divergence = record.divergence,
                "Critical validation/test divergence"
            ),
            Severity::Warning => info!(
                symbol = %record.symbol,
                window_id = record.window_id,
                divergence = record.divergence,
                "Elevated validation/test divergence"
            ),
            Severity::Normal => {}
        }

        self.history.push(record.clone());
        record
    }

    /// Appends records collected elsewhere, e.g. by a parallel worker.
    pub fn merge(&mut self, records: impl IntoIterator<Item = DivergenceRecord>) {
        self.history.extend(records);
    }

    /// Clears the history. Intended for test isolation and explicit resets.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    #[must_use]
    pub fn history(&self) -> &[DivergenceRecord] {
        &self.history
    }

    #[must_use]
    pub fn into_history(self) -> Vec<DivergenceRecord> {
        self.history
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn records_for<'a>(
        &'a self,
        symbol: &'a str,
        horizon: usize,
    ) -> impl Iterator<Item = &'a DivergenceRecord> + 'a {
        self.history
            .iter()
            .filter(move |r| r.symbol == symbol && r.horizon == horizon)
    }

    /// Summarizes recorded divergences, optionally restricted to one horizon.
    #[must_use]
    pub fn summarize(&self, horizon: Option<usize>) -> DivergenceSummary {
        let divergences: Vec<f64> = self
            .history
            .iter()
            .filter(|r| horizon.map_or(true, |h| r.horizon == h))
            .map(|r| r.divergence)
            .collect();

        if divergences.is_empty() {
            return DivergenceSummary::default();
        }

        let overfitting = self
            .history
            .iter()
            .filter(|r| horizon.map_or(true, |h| r.horizon == h) && r.is_overfitting)
            .count();

        DivergenceSummary {
            window_count: divergences.len(),
            pct_overfitting: overfitting as f64 / divergences.len() as f64 * 100.0,
            mean_divergence: forecast_guard_core::stats::mean(&divergences),
            min_divergence: divergences.iter().copied().fold(f64::INFINITY, f64::min),
            max_divergence: divergences.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std_divergence: forecast_guard_core::stats::sample_std(&divergences),
        }
    }

    /// Symbols with an overfitting record at or above `min_severity` within
    /// `lookback` of `now`, sorted and de-duplicated.
    #[must_use]
    pub fn recent_overfitting_symbols(
        &self,
        min_severity: Severity,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cutoff = now - lookback;
        let mut symbols: Vec<String> = self
            .history
            .iter()
            .filter(|r| r.is_overfitting && r.severity >= min_severity && r.timestamp >= cutoff)
            .map(|r| r.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

fn finite_or_zero(name: &str, value: f64, context: &DivergenceContext) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(
            metric = name,
            value = %value,
            symbol = %context.symbol,
            window_id = context.window_id,
            "Non-finite divergence input coerced to 0"
        );
        0.0
    }
}
