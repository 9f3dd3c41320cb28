//! Walk-forward evaluation of a pluggable forecaster.
//!
//! # Process
//!
//! 1. Generate windows over the full bar sequence
//! 2. For each window, in chronological order:
//!    - prepare training data from the train range only and check every
//!      label with the lookahead guard
//!    - train from scratch
//!    - predict each validation and test bar from the bars up to it
//! 3. Record validation/test divergence per window (three-way mode)
//! 4. Pool test predictions and compute [`BacktestMetrics`]
//!
//! A forecaster failure skips the window and the run continues. A
//! lookahead violation aborts the run.

use std::ops::Range;
use std::time::Instant;

use forecast_guard_core::{
    Bar, ForecasterAdapter, GuardError, GuardResult, WalkForwardConfig,
};
use forecast_guard_features::{build_label, LookaheadGuard};
use forecast_guard_monitor::{DivergenceContext, DivergenceMonitor};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::{
    classification_error, first_forecast_per_origin, BacktestMetrics, PredictionOutcome,
};
use crate::report::{RunSummary, SkippedWindow, WalkForwardReport, WindowOutcome};
use crate::window::{Window, WindowGenerator, WindowMode};

#[derive(Debug, Clone)]
pub struct WalkForwardEngine {
    config: WalkForwardConfig,
    neutral_band: f64,
}

impl WalkForwardEngine {
    #[must_use]
    pub fn new(config: WalkForwardConfig, neutral_band: f64) -> Self {
        Self {
            config,
            neutral_band,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Runs every window for one symbol.
    ///
    /// `monitor` receives one divergence record per successful window in
    /// three-way mode.
    ///
    /// # Errors
    /// - `InsufficientData` if the sequence cannot hold a single window.
    /// - `LookaheadViolation` if any label breaks the horizon gap. This is
    ///   never downgraded to a skip.
    pub fn run(
        &self,
        symbol: &str,
        bars: &[Bar],
        forecaster: &mut dyn ForecasterAdapter,
        mut monitor: Option<&mut DivergenceMonitor>,
    ) -> GuardResult<WalkForwardReport> {
        let generator = WindowGenerator::new(&self.config);
        let windows = generator.generate(bars.len())?;
        let mode = generator.mode();

        info!(
            symbol,
            forecaster = forecaster.name(),
            windows = windows.len(),
            bars = bars.len(),
            "Starting walk-forward run"
        );

        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();

        for window in &windows {
            match self.run_window(bars, window, forecaster) {
                Ok(mut outcome) => {
                    if let (Some(monitor), Some(validation_error)) =
                        (monitor.as_deref_mut(), outcome.validation_error)
                    {
                        let mut context =
                            DivergenceContext::new(symbol, self.config.horizon, window.id)
                                .at(bars[window.test_range.end - 1].timestamp);
                        if let Some(train_error) = outcome.train_error {
                            context = context.with_train_error(train_error);
                        }
                        outcome.divergence =
                            Some(monitor.record(validation_error, outcome.test_error, context));
                    }
                    debug!(
                        symbol,
                        window_id = window.id,
                        test_error = outcome.test_error,
                        "Window evaluated"
                    );
                    outcomes.push(outcome);
                }
                Err(e) if e.is_fatal() => {
                    error!(symbol, window_id = window.id, error = %e, "Aborting walk-forward run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(symbol, window_id = window.id, error = %e, "Skipping window");
                    skipped.push(SkippedWindow {
                        window_id: window.id,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let pooled = first_forecast_per_origin(outcomes.iter().flat_map(|o| &o.test_predictions));
        let metrics = (!outcomes.is_empty())
            .then(|| BacktestMetrics::from_outcomes(&pooled, self.config.periods_per_year));

        let summary = RunSummary {
            attempted: windows.len(),
            succeeded: outcomes.len(),
            skipped: skipped.len(),
        };

        info!(
            symbol,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            "Walk-forward run complete"
        );

        Ok(WalkForwardReport {
            run_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            forecaster: forecaster.name().to_string(),
            mode,
            horizon: self.config.horizon,
            windows: outcomes,
            skipped,
            summary,
            metrics,
        })
    }

    fn run_window(
        &self,
        bars: &[Bar],
        window: &Window,
        forecaster: &mut dyn ForecasterAdapter,
    ) -> GuardResult<WindowOutcome> {
        let started = Instant::now();
        let horizon = self.config.horizon;

        // The forecaster only ever sees the train range while training.
        let train_bars = &bars[window.train_range.clone()];
        let data = forecaster.prepare_training_data(train_bars, horizon)?;
        if data.features.len() != data.labels.len() {
            return Err(GuardError::training(
                forecaster.name(),
                format!(
                    "{} feature rows for {} labels",
                    data.features.len(),
                    data.labels.len()
                ),
            ));
        }
        for label in &data.labels {
            LookaheadGuard::check_record_within(label, train_bars.len())?;
        }

        forecaster.train(&data, self.config.min_train_samples)?;

        let validation_predictions = match &window.validation_range {
            Some(range) => self.evaluate(bars, range.clone(), window, forecaster)?,
            None => Vec::new(),
        };
        let test_predictions =
            self.evaluate(bars, window.test_range.clone(), window, forecaster)?;

        let train_error = match window.mode() {
            WindowMode::ThreeWay => {
                let start = window.train_range.start;
                let in_sample = data
                    .labels
                    .iter()
                    .map(|l| start + l.feature_bar_index)
                    .collect::<Vec<_>>();
                let predictions = self.evaluate_indices(bars, &in_sample, window, forecaster)?;
                (!predictions.is_empty()).then(|| classification_error(&predictions))
            }
            WindowMode::TwoWay => None,
        };

        // Checked after the fact: forecaster calls are synchronous and cannot
        // be preempted.
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(budget_ms) = self.config.window_time_budget_ms {
            if elapsed_ms > budget_ms {
                return Err(GuardError::TimeBudgetExceeded {
                    elapsed_ms,
                    budget_ms,
                });
            }
        }

        if test_predictions.is_empty() {
            return Err(GuardError::InsufficientData {
                required: window.test_range.start + horizon + 1,
                available: bars.len(),
            });
        }

        let validation_error = match window.mode() {
            WindowMode::ThreeWay if validation_predictions.is_empty() => {
                return Err(GuardError::InsufficientData {
                    required: window.test_range.start + 1,
                    available: bars.len(),
                });
            }
            WindowMode::ThreeWay => Some(classification_error(&validation_predictions)),
            WindowMode::TwoWay => None,
        };

        Ok(WindowOutcome {
            window: window.clone(),
            training_samples: data.len(),
            train_error,
            validation_error,
            test_error: classification_error(&test_predictions),
            validation_predictions,
            test_predictions,
            divergence: None,
            elapsed_ms,
        })
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        range: Range<usize>,
        window: &Window,
        forecaster: &dyn ForecasterAdapter,
    ) -> GuardResult<Vec<PredictionOutcome>> {
        let indices: Vec<usize> = range.collect();
        self.evaluate_indices(bars, &indices, window, forecaster)
    }

    /// Predicts at each absolute index from `bars[..=index]` and attaches the
    /// realized label. Indices whose label bar does not exist yet are dropped.
    fn evaluate_indices(
        &self,
        bars: &[Bar],
        indices: &[usize],
        window: &Window,
        forecaster: &dyn ForecasterAdapter,
    ) -> GuardResult<Vec<PredictionOutcome>> {
        let mut predictions = Vec::with_capacity(indices.len());
        for &index in indices {
            let label = match build_label(bars, index, self.config.horizon, self.neutral_band) {
                Ok(label) => label,
                Err(GuardError::InsufficientData { .. }) => continue,
                Err(e) => return Err(e),
            };
            LookaheadGuard::check_record(&label)?;

            let prediction = forecaster.predict(&bars[..=index])?;
            predictions.push(PredictionOutcome {
                window_id: window.id,
                index,
                timestamp: bars[index].timestamp,
                predicted: prediction.label,
                actual: label.realized_class,
                realized_return: label.realized_return,
                score: prediction.score(),
                confidence: prediction.confidence,
            });
        }
        Ok(predictions)
    }
}
