//! Aggregate metrics over pooled walk-forward predictions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use forecast_guard_core::stats::{mean, sample_std};
use forecast_guard_core::Direction;
use serde::{Deserialize, Serialize};

/// One prediction paired with what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub window_id: usize,
    /// Absolute bar index the prediction was made at.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub predicted: Direction,
    pub actual: Direction,
    pub realized_return: f64,
    /// Signed directional score in `[-1, 1]`.
    pub score: f64,
    pub confidence: f64,
}

impl PredictionOutcome {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.predicted == self.actual
    }

    /// Return earned by taking the predicted position.
    #[must_use]
    pub fn strategy_return(&self) -> f64 {
        self.predicted.position() * self.realized_return
    }

    /// Squared error between the score and the realized direction.
    #[must_use]
    pub fn squared_error(&self) -> f64 {
        (self.actual.position() - self.score).powi(2)
    }
}

/// Classification error (1 - accuracy). Empty input has no error.
#[must_use]
pub fn classification_error(outcomes: &[PredictionOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let correct = outcomes.iter().filter(|o| o.is_correct()).count();
    1.0 - correct as f64 / outcomes.len() as f64
}

/// Keeps one outcome per forecast origin, ordered by bar index.
///
/// When the step is shorter than the test window, a bar falls in several
/// windows' test ranges. The outcome from the earliest such window is kept,
/// since that is the first time the origin was forecast out of sample.
#[must_use]
pub fn first_forecast_per_origin<'a>(
    outcomes: impl IntoIterator<Item = &'a PredictionOutcome>,
) -> Vec<PredictionOutcome> {
    let mut by_origin: BTreeMap<usize, PredictionOutcome> = BTreeMap::new();
    for outcome in outcomes {
        by_origin
            .entry(outcome.index)
            .and_modify(|kept| {
                if outcome.window_id < kept.window_id {
                    *kept = *outcome;
                }
            })
            .or_insert(*outcome);
    }
    by_origin.into_values().collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Immutable summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub sample_count: usize,
    pub accuracy: f64,
    /// Macro averages over bullish, neutral and bearish.
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub bullish: ClassMetrics,
    pub neutral: ClassMetrics,
    pub bearish: ClassMetrics,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Most negative gap between cumulative return and its running peak.
    pub max_drawdown: f64,
    pub total_return: f64,
    pub win_rate: f64,
    /// `None` when there were no losing trades.
    pub profit_factor: Option<f64>,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

impl BacktestMetrics {
    /// Computes metrics from pooled outcomes in chronological order.
    #[must_use]
    pub fn from_outcomes(outcomes: &[PredictionOutcome], periods_per_year: f64) -> Self {
        let n = outcomes.len();
        let accuracy = if n == 0 {
            0.0
        } else {
            1.0 - classification_error(outcomes)
        };

        let bullish = class_metrics(outcomes, Direction::Bullish);
        let neutral = class_metrics(outcomes, Direction::Neutral);
        let bearish = class_metrics(outcomes, Direction::Bearish);
        let per_class = [bullish, neutral, bearish];
        let macro_avg = |f: fn(&ClassMetrics) -> f64| per_class.iter().map(f).sum::<f64>() / 3.0;

        let returns: Vec<f64> = outcomes.iter().map(PredictionOutcome::strategy_return).collect();
        let annualization = periods_per_year.max(0.0).sqrt();

        let trades: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.predicted != Direction::Neutral)
            .map(PredictionOutcome::strategy_return)
            .collect();
        let winning_trades = trades.iter().filter(|r| **r > 0.0).count();
        let losing_trades = trades.iter().filter(|r| **r < 0.0).count();
        let gross_profit: f64 = trades.iter().filter(|r| **r > 0.0).sum();
        let gross_loss: f64 = -trades.iter().filter(|r| **r < 0.0).sum::<f64>();

        Self {
            sample_count: n,
            accuracy,
            precision: macro_avg(|c| c.precision),
            recall: macro_avg(|c| c.recall),
            f1: macro_avg(|c| c.f1),
            bullish,
            neutral,
            bearish,
            sharpe_ratio: sharpe_ratio(&returns) * annualization,
            sortino_ratio: sortino_ratio(&returns) * annualization,
            max_drawdown: max_drawdown(&returns),
            total_return: returns.iter().sum(),
            win_rate: if trades.is_empty() {
                0.0
            } else {
                winning_trades as f64 / trades.len() as f64
            },
            profit_factor: (gross_loss > 0.0).then(|| gross_profit / gross_loss),
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
        }
    }
}

fn class_metrics(outcomes: &[PredictionOutcome], class: Direction) -> ClassMetrics {
    let true_positive = outcomes
        .iter()
        .filter(|o| o.predicted == class && o.actual == class)
        .count();
    let predicted = outcomes.iter().filter(|o| o.predicted == class).count();
    let support = outcomes.iter().filter(|o| o.actual == class).count();

    let precision = ratio(true_positive, predicted);
    let recall = ratio(true_positive, support);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ClassMetrics {
        precision,
        recall,
        f1,
        support,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Per-period Sharpe ratio (mean / sample stdev). Zero when undefined.
#[must_use]
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let std_dev = sample_std(returns);
    if std_dev <= f64::EPSILON {
        return 0.0;
    }
    mean(returns) / std_dev
}

/// Per-period Sortino ratio using the stdev of negative returns only.
/// Zero when fewer than two negative returns exist.
#[must_use]
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_std = sample_std(&downside);
    if downside_std <= f64::EPSILON {
        return 0.0;
    }
    mean(returns) / downside_std
}

/// Minimum over time of (cumulative return - running max cumulative return),
/// with the running max starting at 0. Always `<= 0`.
#[must_use]
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for r in returns {
        cumulative += r;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative - peak);
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(predicted: Direction, actual: Direction, realized_return: f64) -> PredictionOutcome {
        PredictionOutcome {
            window_id: 0,
            index: 0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            predicted,
            actual,
            realized_return,
            score: predicted.position(),
            confidence: 1.0,
        }
    }

    fn at(window_id: usize, index: usize, score: f64) -> PredictionOutcome {
        PredictionOutcome {
            window_id,
            index,
            score,
            ..outcome(Direction::Bullish, Direction::Bullish, 0.01)
        }
    }

    // ============================================================
    // Origin de-duplication
    // ============================================================

    #[test]
    fn overlapping_windows_keep_earliest_forecast_per_origin() {
        // test=4, step=2: bars 12..14 appear in windows 0 and 1
        let outcomes: Vec<PredictionOutcome> = (10..14)
            .map(|i| at(0, i, 0.1))
            .chain((12..16).map(|i| at(1, i, 0.9)))
            .collect();

        let unique = first_forecast_per_origin(&outcomes);

        assert_eq!(unique.len(), 6);
        let indices: Vec<usize> = unique.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![10, 11, 12, 13, 14, 15]);
        assert!(unique[..4].iter().all(|o| o.window_id == 0 && o.score == 0.1));
        assert!(unique[4..].iter().all(|o| o.window_id == 1));
    }

    #[test]
    fn earliest_window_wins_regardless_of_input_order() {
        let outcomes = vec![at(3, 20, 0.9), at(1, 20, 0.1), at(2, 20, 0.5)];
        let unique = first_forecast_per_origin(&outcomes);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].window_id, 1);
    }

    // ============================================================
    // Return-based metrics
    // ============================================================

    #[test]
    fn max_drawdown_tracks_peak_to_trough() {
        let returns = [0.10, -0.05, -0.10, 0.02, 0.20, -0.01];
        // cumulative: 0.10, 0.05, -0.05, -0.03, 0.17, 0.16
        assert!((max_drawdown(&returns) + 0.15).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_of_rising_series_is_zero() {
        assert_eq!(max_drawdown(&[0.01, 0.02, 0.03]), 0.0);
    }

    #[test]
    fn sharpe_of_constant_returns_is_zero() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01]), 0.0);
    }

    #[test]
    fn sharpe_is_mean_over_sample_std() {
        let returns = [0.01, 0.03, -0.01, 0.05];
        let expected = mean(&returns) / sample_std(&returns);
        assert!((sharpe_ratio(&returns) - expected).abs() < 1e-12);
    }

    #[test]
    fn sortino_ignores_upside_dispersion() {
        let calm_upside = [-0.01, -0.02, 0.01, 0.01];
        let wild_upside = [-0.01, -0.02, 0.001, 0.019];
        assert!((sortino_ratio(&calm_upside) - sortino_ratio(&wild_upside)).abs() < 1e-12);
    }

    // ============================================================
    // Aggregation
    // ============================================================

    #[test]
    fn perfect_predictions_score_full_accuracy() {
        let outcomes = vec![
            outcome(Direction::Bullish, Direction::Bullish, 0.02),
            outcome(Direction::Bearish, Direction::Bearish, -0.01),
            outcome(Direction::Neutral, Direction::Neutral, 0.0),
        ];
        let m = BacktestMetrics::from_outcomes(&outcomes, 252.0);
        assert!((m.accuracy - 1.0).abs() < 1e-12);
        assert!((m.f1 - 1.0).abs() < 1e-12);
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.winning_trades, 2);
        assert!((m.win_rate - 1.0).abs() < 1e-12);
        assert!(m.profit_factor.is_none());
        assert!((m.total_return - 0.03).abs() < 1e-12);
    }

    #[test]
    fn per_class_precision_and_recall() {
        let outcomes = vec![
            outcome(Direction::Bullish, Direction::Bullish, 0.02),
            outcome(Direction::Bullish, Direction::Bearish, -0.02),
            outcome(Direction::Bearish, Direction::Bearish, -0.01),
            outcome(Direction::Neutral, Direction::Bullish, 0.03),
        ];
        let m = BacktestMetrics::from_outcomes(&outcomes, 252.0);

        assert!((m.bullish.precision - 0.5).abs() < 1e-12);
        assert!((m.bullish.recall - 0.5).abs() < 1e-12);
        assert!((m.bearish.precision - 1.0).abs() < 1e-12);
        assert!((m.bearish.recall - 0.5).abs() < 1e-12);
        assert_eq!(m.neutral.support, 0);
        assert_eq!(m.neutral.precision, 0.0);
        assert!((m.accuracy - 0.5).abs() < 1e-12);

        // trades: +0.02, -0.02, +0.01
        assert_eq!(m.losing_trades, 1);
        assert!((m.profit_factor.unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn empty_outcomes_produce_zeroed_metrics() {
        let m = BacktestMetrics::from_outcomes(&[], 252.0);
        assert_eq!(m.sample_count, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn classification_error_is_complement_of_accuracy() {
        let outcomes = vec![
            outcome(Direction::Bullish, Direction::Bullish, 0.02),
            outcome(Direction::Bullish, Direction::Bearish, -0.02),
        ];
        assert!((classification_error(&outcomes) - 0.5).abs() < 1e-12);
        assert_eq!(classification_error(&[]), 0.0);
    }
}
