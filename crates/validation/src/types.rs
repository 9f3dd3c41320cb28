//! Core types shared by the statistical tests.

use chrono::NaiveDate;
use forecast_guard_backtest::{first_forecast_per_origin, PredictionOutcome};
use forecast_guard_core::GuardError;
use serde::{Deserialize, Serialize};

/// A predictive score paired with the return that followed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredObservation {
    /// Evaluation date used for cross-sectional grouping
    pub date: NaiveDate,
    /// Symbol the score was produced for
    pub symbol: String,
    /// Signed directional score
    pub score: f64,
    /// Realized forward return
    pub forward_return: f64,
}

impl ScoredObservation {
    /// Converts test predictions for one symbol into observations, one per
    /// forecast origin.
    #[must_use]
    pub fn from_outcomes(symbol: &str, outcomes: &[PredictionOutcome]) -> Vec<Self> {
        first_forecast_per_origin(outcomes)
            .iter()
            .map(|o| Self {
                date: o.timestamp.date_naive(),
                symbol: symbol.to_string(),
                score: o.score,
                forward_return: o.realized_return,
            })
            .collect()
    }
}

/// Outcome class of a statistical test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Null hypothesis rejected at the configured alpha
    Significant,
    /// Null hypothesis not rejected
    NotSignificant,
    /// Too few observations to reach either conclusion
    InsufficientSample,
}

/// Summary of a single test, intended for reports rather than storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTestResult {
    /// Name of the test performed
    pub test_name: String,
    /// Test statistic (t, z or DM depending on the test)
    pub statistic: f64,
    /// P-value of the statistic
    pub p_value: f64,
    /// Whether p < alpha. Always false for an insufficient sample.
    pub is_significant: bool,
    /// Number of observations (groups, permutations or origins) used
    pub sample_size: usize,
    pub verdict: Verdict,
    /// Human-readable reading of the result
    pub interpretation: String,
}

impl StatisticalTestResult {
    /// Builds a result from a statistic and p-value at significance `alpha`.
    #[must_use]
    pub fn from_p_value(
        test_name: &str,
        statistic: f64,
        p_value: f64,
        sample_size: usize,
        alpha: f64,
        interpretation: impl Into<String>,
    ) -> Self {
        let is_significant = p_value < alpha;
        Self {
            test_name: test_name.to_string(),
            statistic,
            p_value,
            is_significant,
            sample_size,
            verdict: if is_significant {
                Verdict::Significant
            } else {
                Verdict::NotSignificant
            },
            interpretation: interpretation.into(),
        }
    }

    /// Result for a test that ran on too little data. Reported as neither a
    /// pass nor a fail.
    #[must_use]
    pub fn underpowered(test_name: &str, available: usize, required: usize) -> Self {
        let reason = GuardError::StatisticalUnderpowered {
            test: test_name.to_string(),
            available,
            required,
        };
        Self {
            test_name: test_name.to_string(),
            statistic: 0.0,
            p_value: 1.0,
            is_significant: false,
            sample_size: available,
            verdict: Verdict::InsufficientSample,
            interpretation: format!("insufficient sample: {reason}"),
        }
    }

    #[must_use]
    pub fn is_underpowered(&self) -> bool {
        self.verdict == Verdict::InsufficientSample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p_value_below_alpha_is_significant() {
        let result = StatisticalTestResult::from_p_value("t", 3.0, 0.01, 40, 0.05, "edge");
        assert!(result.is_significant);
        assert_eq!(result.verdict, Verdict::Significant);

        let result = StatisticalTestResult::from_p_value("t", 1.0, 0.05, 40, 0.05, "none");
        assert!(!result.is_significant);
        assert_eq!(result.verdict, Verdict::NotSignificant);
    }

    #[test]
    fn underpowered_is_neither_pass_nor_fail() {
        let result = StatisticalTestResult::underpowered("diebold_mariano", 40, 100);
        assert!(result.is_underpowered());
        assert!(!result.is_significant);
        assert!(result.interpretation.starts_with("insufficient sample"));
    }

    #[test]
    fn verdict_serializes_snake_case() {
        let json = serde_json::to_string(&Verdict::InsufficientSample).unwrap();
        assert_eq!(json, "\"insufficient_sample\"");
    }

    #[test]
    fn observations_hold_one_entry_per_origin() {
        use chrono::{Duration, TimeZone, Utc};
        use forecast_guard_core::Direction;

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let outcome = |window_id: usize, index: usize, score: f64| PredictionOutcome {
            window_id,
            index,
            timestamp: start + Duration::days(index as i64),
            predicted: Direction::Bullish,
            actual: Direction::Bullish,
            realized_return: 0.01,
            score,
            confidence: 1.0,
        };
        // Bars 2 and 3 fall in both windows' test ranges
        let outcomes = vec![
            outcome(0, 0, 0.1),
            outcome(0, 1, 0.1),
            outcome(0, 2, 0.1),
            outcome(0, 3, 0.1),
            outcome(1, 2, 0.9),
            outcome(1, 3, 0.9),
            outcome(1, 4, 0.9),
            outcome(1, 5, 0.9),
        ];

        let observations = ScoredObservation::from_outcomes("AAA", &outcomes);

        assert_eq!(observations.len(), 6);
        let dates: Vec<NaiveDate> = observations.iter().map(|o| o.date).collect();
        let mut unique = dates.clone();
        unique.dedup();
        assert_eq!(dates, unique);
        assert_eq!(observations[2].score, 0.1);
        assert_eq!(observations[4].score, 0.9);
    }
}
