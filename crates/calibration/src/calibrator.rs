//! Ensemble weight search on validation data with a held-out acceptance check.
//!
//! # Process
//!
//! 1. Search the weight simplex (all weights >= 0, sum = 1) scoring each
//!    candidate on validation loss only
//! 2. Keep the candidate with the lowest validation loss
//! 3. Score that candidate once on the test split and record the
//!    validation/test divergence with the monitor
//! 4. Accept the candidate unless the monitor flags overfitting, in which
//!    case fall back to equal weights

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use forecast_guard_core::{CalibrationConfig, GuardError, GuardResult};
use forecast_guard_monitor::{DivergenceContext, DivergenceMonitor, Severity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Component forecasts and realized targets for one data split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSplit {
    /// One row per sample, one column per component.
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl CalibrationSplit {
    /// # Errors
    /// Returns `InvalidConfig` if row and target counts differ or rows have
    /// different widths.
    pub fn new(rows: Vec<Vec<f64>>, targets: Vec<f64>) -> GuardResult<Self> {
        if rows.len() != targets.len() {
            return Err(GuardError::InvalidConfig(format!(
                "{} forecast rows for {} targets",
                rows.len(),
                targets.len()
            )));
        }
        if let Some(first) = rows.first() {
            if rows.iter().any(|r| r.len() != first.len()) {
                return Err(GuardError::InvalidConfig(
                    "forecast rows have different component counts".to_string(),
                ));
            }
        }
        Ok(Self { rows, targets })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of components, or `None` for an empty split.
    #[must_use]
    pub fn width(&self) -> Option<usize> {
        self.rows.first().map(Vec::len)
    }

    /// Mean squared error of the blended forecast. Zero for an empty split.
    #[must_use]
    pub fn loss(&self, weights: &[f64]) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .rows
            .iter()
            .zip(&self.targets)
            .map(|(row, target)| {
                let blended: f64 = row.iter().zip(weights).map(|(f, w)| f * w).sum();
                (blended - target).powi(2)
            })
            .sum();
        total / self.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Every point of the simplex grid at the configured step
    Grid,
    /// Coordinate-wise line search starting from equal weights
    LineSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Weights to use: the searched weights if accepted, equal weights otherwise
    pub weights: BTreeMap<String, f64>,
    /// Best weights found by the search, kept for inspection after a rejection
    pub searched_weights: BTreeMap<String, f64>,
    pub train_loss: Option<f64>,
    pub validation_loss: f64,
    pub test_loss: f64,
    pub divergence: f64,
    pub severity: Severity,
    pub accepted: bool,
    pub strategy: SearchStrategy,
    pub candidates_evaluated: usize,
    pub calibrated_at: DateTime<Utc>,
}

/// Equal weight per component.
#[must_use]
pub fn equal_weights(components: &[String]) -> BTreeMap<String, f64> {
    let weight = 1.0 / components.len().max(1) as f64;
    components.iter().map(|c| (c.clone(), weight)).collect()
}

#[derive(Debug, Clone, Default)]
pub struct WeightCalibrator {
    config: CalibrationConfig,
}

impl WeightCalibrator {
    #[must_use]
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    #[must_use]
    pub fn strategy_for(&self, components: usize) -> SearchStrategy {
        if components <= self.config.max_grid_components {
            SearchStrategy::Grid
        } else {
            SearchStrategy::LineSearch
        }
    }

    /// Calibrates blending weights and records the acceptance check with
    /// `monitor`.
    ///
    /// `train` only contributes the train loss of the chosen weights to the
    /// divergence record. `test` is scored exactly once, after the search.
    ///
    /// # Errors
    /// - `InvalidConfig` if there are no components or a split's width does
    ///   not match the component count.
    /// - `InsufficientData` if validation has fewer than
    ///   `min_samples_for_calibration` samples or test is empty.
    pub fn calibrate(
        &self,
        train: &CalibrationSplit,
        validation: &CalibrationSplit,
        test: &CalibrationSplit,
        components: &[String],
        context: DivergenceContext,
        monitor: &mut DivergenceMonitor,
    ) -> GuardResult<CalibrationResult> {
        let n = components.len();
        if n == 0 {
            return Err(GuardError::InvalidConfig(
                "calibration needs at least one component".to_string(),
            ));
        }
        for (name, split) in [("train", train), ("validation", validation), ("test", test)] {
            if let Some(width) = split.width() {
                if width != n {
                    return Err(GuardError::InvalidConfig(format!(
                        "{name} split has {width} columns for {n} components"
                    )));
                }
            }
        }
        if validation.len() < self.config.min_samples_for_calibration {
            return Err(GuardError::InsufficientData {
                required: self.config.min_samples_for_calibration,
                available: validation.len(),
            });
        }
        if test.is_empty() {
            return Err(GuardError::InsufficientData {
                required: 1,
                available: 0,
            });
        }

        let strategy = self.strategy_for(n);
        let (searched, validation_loss, candidates_evaluated) = match strategy {
            SearchStrategy::Grid => self.grid_search(validation, n),
            SearchStrategy::LineSearch => self.line_search(validation, n),
        };
        debug!(
            symbol = %context.symbol,
            ?strategy,
            candidates_evaluated,
            validation_loss,
            "Weight search complete"
        );

        let test_loss = test.loss(&searched);
        let train_loss = (!train.is_empty()).then(|| train.loss(&searched));
        let context = match train_loss {
            Some(loss) => context.with_train_error(loss),
            None => context,
        };
        let record = monitor.record(validation_loss, test_loss, context);

        let searched_weights: BTreeMap<String, f64> = components
            .iter()
            .cloned()
            .zip(searched.iter().copied())
            .collect();
        let accepted = !record.is_overfitting;
        let weights = if accepted {
            info!(
                symbol = %record.symbol,
                horizon = record.horizon,
                divergence = record.divergence,
                "Calibrated weights accepted"
            );
            searched_weights.clone()
        } else {
            warn!(
                symbol = %record.symbol,
                horizon = record.horizon,
                divergence = record.divergence,
                severity = ?record.severity,
                "Calibrated weights rejected; reverting to equal weights"
            );
            equal_weights(components)
        };

        Ok(CalibrationResult {
            weights,
            searched_weights,
            train_loss,
            validation_loss,
            test_loss,
            divergence: record.divergence,
            severity: record.severity,
            accepted,
            strategy,
            candidates_evaluated,
            calibrated_at: record.timestamp,
        })
    }

    fn grid_search(&self, validation: &CalibrationSplit, n: usize) -> (Vec<f64>, f64, usize) {
        let candidates = simplex_grid(n, self.config.grid_step);
        let mut best = vec![1.0 / n as f64; n];
        let mut best_loss = f64::INFINITY;
        for candidate in &candidates {
            let loss = validation.loss(candidate);
            if loss < best_loss {
                best_loss = loss;
                best.clone_from(candidate);
            }
        }
        (best, best_loss, candidates.len())
    }

    fn line_search(&self, validation: &CalibrationSplit, n: usize) -> (Vec<f64>, f64, usize) {
        let steps = grid_units(self.config.grid_step);
        let mut best = vec![1.0 / n as f64; n];
        let mut best_loss = validation.loss(&best);
        let mut evaluated = 1;

        for _ in 0..self.config.line_search_iterations {
            let mut improved = false;
            for component in 0..n {
                for k in 0..=steps {
                    let candidate = reweight(&best, component, k as f64 / steps as f64);
                    let loss = validation.loss(&candidate);
                    evaluated += 1;
                    if loss < best_loss - 1e-15 {
                        best = candidate;
                        best_loss = loss;
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }
        (best, best_loss, evaluated)
    }
}

fn grid_units(step: f64) -> usize {
    if step <= 0.0 || !step.is_finite() {
        return 1;
    }
    ((1.0 / step).round() as usize).max(1)
}

/// All weight vectors on the simplex whose entries are multiples of `step`.
#[must_use]
pub fn simplex_grid(n: usize, step: f64) -> Vec<Vec<f64>> {
    if n == 0 {
        return Vec::new();
    }
    let units = grid_units(step);
    let mut out = Vec::new();
    let mut current = vec![0; n];
    compositions(units, 0, &mut current, units, &mut out);
    out
}

fn compositions(
    remaining: usize,
    position: usize,
    current: &mut [usize],
    units: usize,
    out: &mut Vec<Vec<f64>>,
) {
    if position == current.len() - 1 {
        current[position] = remaining;
        out.push(current.iter().map(|c| *c as f64 / units as f64).collect());
        return;
    }
    for k in 0..=remaining {
        current[position] = k;
        compositions(remaining - k, position + 1, current, units, out);
    }
}

/// Sets `weights[component] = target` and rescales the rest to keep the sum
/// at 1.
fn reweight(weights: &[f64], component: usize, target: f64) -> Vec<f64> {
    let n = weights.len();
    let others: f64 = weights
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != component)
        .map(|(_, w)| w)
        .sum();
    let remainder = 1.0 - target;

    let mut out: Vec<f64> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i == component {
                target
            } else if others > f64::EPSILON {
                w / others * remainder
            } else {
                remainder / (n - 1) as f64
            }
        })
        .collect();

    let total: f64 = out.iter().sum();
    if total > f64::EPSILON {
        for w in &mut out {
            *w /= total;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_guard_core::DivergenceConfig;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("model_{i}")).collect()
    }

    fn monitor() -> DivergenceMonitor {
        DivergenceMonitor::new(DivergenceConfig::default())
    }

    fn context() -> DivergenceContext {
        DivergenceContext::new("AAPL", 5, 0)
    }

    /// Component 0 tracks `sign * target` with small noise, the rest are pure
    /// noise.
    fn split(rng: &mut ChaCha8Rng, len: usize, n: usize, sign: f64) -> CalibrationSplit {
        let mut rows = Vec::with_capacity(len);
        let mut targets = Vec::with_capacity(len);
        for _ in 0..len {
            let target: f64 = rng.gen_range(-1.0..1.0);
            let mut row = Vec::with_capacity(n);
            row.push(sign * target + rng.gen_range(-0.1..0.1));
            for _ in 1..n {
                row.push(rng.gen_range(-1.0..1.0));
            }
            rows.push(row);
            targets.push(target);
        }
        CalibrationSplit::new(rows, targets).unwrap()
    }

    fn assert_on_simplex(weights: &BTreeMap<String, f64>) {
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-6, "sum = {total}");
        assert!(weights.values().all(|w| *w >= 0.0));
    }

    // ============================================================
    // Simplex
    // ============================================================

    #[test]
    fn grid_enumerates_every_composition() {
        let grid = simplex_grid(3, 0.5);
        // Compositions of 2 units into 3 parts
        assert_eq!(grid.len(), 6);
        for point in &grid {
            assert!((point.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn reweight_keeps_sum_at_one() {
        let w = reweight(&[0.2, 0.3, 0.5], 1, 0.8);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((w[1] - 0.8).abs() < 1e-12);
        // Others keep their 2:5 ratio
        assert!((w[0] / w[2] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn weights_always_lie_on_simplex() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let calibrator = WeightCalibrator::default();
        for n in 1..=6 {
            for _ in 0..5 {
                let validation = split(&mut rng, 60, n, 1.0);
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                let test = split(&mut rng, 30, n, sign);
                let result = calibrator
                    .calibrate(
                        &CalibrationSplit::default(),
                        &validation,
                        &test,
                        &names(n),
                        context(),
                        &mut monitor(),
                    )
                    .unwrap();
                assert_on_simplex(&result.weights);
                assert_on_simplex(&result.searched_weights);
            }
        }
    }

    // ============================================================
    // Acceptance
    // ============================================================

    #[test]
    fn consistent_skill_is_accepted() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let validation = split(&mut rng, 1_000, 3, 1.0);
        let test = split(&mut rng, 1_000, 3, 1.0);
        let mut monitor = monitor();

        let result = WeightCalibrator::default()
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &test,
                &names(3),
                context(),
                &mut monitor,
            )
            .unwrap();

        assert!(result.accepted);
        assert_eq!(result.strategy, SearchStrategy::Grid);
        assert!(result.weights["model_0"] >= 0.85);
        assert_eq!(monitor.len(), 1);
        assert!(!monitor.history()[0].is_overfitting);
    }

    #[test]
    fn divergent_test_loss_reverts_to_equal_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let validation = split(&mut rng, 200, 3, 1.0);
        let test = split(&mut rng, 200, 3, -1.0);
        let mut monitor = monitor();

        let result = WeightCalibrator::default()
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &test,
                &names(3),
                context(),
                &mut monitor,
            )
            .unwrap();

        assert!(!result.accepted);
        assert!(result.divergence > 0.20);
        assert_eq!(result.severity, Severity::Critical);
        for w in result.weights.values() {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
        assert!(result.searched_weights["model_0"] > 0.5);
        assert!(monitor.history()[0].is_overfitting);
    }

    #[test]
    fn search_never_reads_the_test_split() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let validation = split(&mut rng, 100, 3, 1.0);
        let good_test = split(&mut rng, 50, 3, 1.0);
        let bad_test = split(&mut rng, 50, 3, -1.0);
        let calibrator = WeightCalibrator::default();

        let a = calibrator
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &good_test,
                &names(3),
                context(),
                &mut monitor(),
            )
            .unwrap();
        let b = calibrator
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &bad_test,
                &names(3),
                context(),
                &mut monitor(),
            )
            .unwrap();

        assert_eq!(a.searched_weights, b.searched_weights);
        assert!((a.validation_loss - b.validation_loss).abs() < 1e-15);
    }

    #[test]
    fn many_components_use_line_search() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let validation = split(&mut rng, 1_000, 6, 1.0);
        let test = split(&mut rng, 1_000, 6, 1.0);

        let result = WeightCalibrator::default()
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &test,
                &names(6),
                context(),
                &mut monitor(),
            )
            .unwrap();

        assert_eq!(result.strategy, SearchStrategy::LineSearch);
        assert!(result.weights["model_0"] > 0.7);
    }

    #[test]
    fn train_loss_is_attached_to_the_divergence_record() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let train = split(&mut rng, 100, 2, 1.0);
        let validation = split(&mut rng, 100, 2, 1.0);
        let test = split(&mut rng, 100, 2, 1.0);
        let mut monitor = monitor();

        let result = WeightCalibrator::default()
            .calibrate(&train, &validation, &test, &names(2), context(), &mut monitor)
            .unwrap();

        assert!(result.train_loss.is_some());
        assert_eq!(monitor.history()[0].train_error, result.train_loss);
    }

    // ============================================================
    // Errors
    // ============================================================

    #[test]
    fn small_validation_split_is_insufficient_data() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let validation = split(&mut rng, 10, 2, 1.0);
        let test = split(&mut rng, 10, 2, 1.0);
        let err = WeightCalibrator::default()
            .calibrate(
                &CalibrationSplit::default(),
                &validation,
                &test,
                &names(2),
                context(),
                &mut monitor(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::InsufficientData {
                required: 50,
                available: 10
            }
        );
    }

    #[test]
    fn mismatched_split_is_rejected() {
        assert!(CalibrationSplit::new(vec![vec![1.0]], vec![]).is_err());
        assert!(CalibrationSplit::new(vec![vec![1.0], vec![1.0, 2.0]], vec![0.0, 0.0]).is_err());
    }
}
