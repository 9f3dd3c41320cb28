use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub walk_forward: WalkForwardConfig,
    pub features: FeatureConfig,
    pub divergence: DivergenceConfig,
    pub statistics: StatisticsConfig,
    pub calibration: CalibrationConfig,
    pub freshness: FreshnessConfig,
    pub batch: BatchConfig,
}

/// Window geometry, in bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub train_size: usize,
    /// `None` runs a two-way train/test backtest.
    pub validation_size: Option<usize>,
    pub test_size: usize,
    pub step: usize,
    /// Forecast horizon in bars.
    pub horizon: usize,
    /// Minimum labelled samples passed to `ForecasterAdapter::train`.
    pub min_train_samples: usize,
    /// Annualization factor for Sharpe and Sortino.
    pub periods_per_year: f64,
    /// Per-window budget for train + predict. Overruns skip the window.
    ///
    /// The budget is checked once the window's train and predict calls have
    /// returned; a forecaster that never returns is not interrupted and keeps
    /// its worker blocked.
    pub window_time_budget_ms: Option<u64>,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_size: 126,
            validation_size: None,
            test_size: 10,
            step: 2,
            horizon: 1,
            min_train_samples: 30,
            periods_per_year: 252.0,
            window_time_budget_ms: None,
        }
    }
}

impl WalkForwardConfig {
    #[must_use]
    pub fn new(train_size: usize, test_size: usize, step: usize) -> Self {
        Self {
            train_size,
            test_size,
            step,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_validation(mut self, validation_size: usize) -> Self {
        self.validation_size = Some(validation_size);
        self
    }

    #[must_use]
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    #[must_use]
    pub fn with_min_train_samples(mut self, min_train_samples: usize) -> Self {
        self.min_train_samples = min_train_samples;
        self
    }

    #[must_use]
    pub fn with_time_budget_ms(mut self, budget_ms: u64) -> Self {
        self.window_time_budget_ms = Some(budget_ms);
        self
    }

    /// Bars consumed by a single window: `T + V + S`.
    #[must_use]
    pub fn window_span(&self) -> usize {
        self.train_size + self.validation_size.unwrap_or(0) + self.test_size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Absolute return at or below which a label is neutral.
    pub neutral_band: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            neutral_band: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Divergence strictly above this flags overfitting.
    pub divergence_threshold: f64,
    pub alert_warning_threshold: f64,
    pub alert_critical_threshold: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            divergence_threshold: 0.20,
            alert_warning_threshold: 0.15,
            alert_critical_threshold: 0.30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Significance level shared by every test.
    pub alpha: f64,
    pub n_permutations: usize,
    pub permutation_seed: Option<u64>,
    pub min_group_size_for_ic: usize,
    pub dm_min_origins: usize,
    /// Fraction of per-symbol results that must individually improve on
    /// the baseline for the acceptance gate to pass.
    pub min_symbol_pass_fraction: f64,
    /// Observed IC this many null standard deviations from the null mean
    /// is treated as leakage.
    pub leakage_z_threshold: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            n_permutations: 500,
            permutation_seed: None,
            min_group_size_for_ic: 25,
            dm_min_origins: 100,
            min_symbol_pass_fraction: 0.6,
            leakage_z_threshold: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_samples_for_calibration: usize,
    /// Simplex grid resolution.
    pub grid_step: f64,
    /// Above this many components the calibrator uses line search.
    pub max_grid_components: usize,
    pub line_search_iterations: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples_for_calibration: 50,
            grid_step: 0.05,
            max_grid_components: 4,
            line_search_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub staleness_hours: i64,
    pub min_new_evaluations: usize,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            staleness_hours: 24,
            min_new_evaluations: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Symbols evaluated concurrently.
    pub workers: usize,
    pub timeframe: String,
    pub bar_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeframe: "1d".to_string(),
            bar_limit: 1_000,
        }
    }
}

impl GuardConfig {
    /// Rejects settings that would make the engine or the tests meaningless.
    ///
    /// # Errors
    /// Returns [`GuardError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> GuardResult<()> {
        let wf = &self.walk_forward;
        if wf.train_size == 0 || wf.test_size == 0 {
            return Err(GuardError::InvalidConfig(
                "train_size and test_size must be positive".to_string(),
            ));
        }
        if wf.validation_size == Some(0) {
            return Err(GuardError::InvalidConfig(
                "validation_size must be positive when set".to_string(),
            ));
        }
        if wf.step == 0 {
            return Err(GuardError::InvalidConfig("step must be positive".to_string()));
        }
        if wf.horizon == 0 {
            return Err(GuardError::InvalidConfig("horizon must be positive".to_string()));
        }
        if wf.periods_per_year <= 0.0 {
            return Err(GuardError::InvalidConfig(
                "periods_per_year must be positive".to_string(),
            ));
        }

        let div = &self.divergence;
        if div.alert_warning_threshold >= div.alert_critical_threshold {
            return Err(GuardError::InvalidConfig(format!(
                "alert_warning_threshold ({}) must be below alert_critical_threshold ({})",
                div.alert_warning_threshold, div.alert_critical_threshold
            )));
        }
        if div.divergence_threshold <= 0.0 || div.alert_warning_threshold <= 0.0 {
            return Err(GuardError::InvalidConfig(
                "divergence thresholds must be positive".to_string(),
            ));
        }

        let stats = &self.statistics;
        if stats.alpha <= 0.0 || stats.alpha >= 1.0 {
            return Err(GuardError::InvalidConfig("alpha must be in (0, 1)".to_string()));
        }
        if stats.n_permutations == 0 {
            return Err(GuardError::InvalidConfig(
                "n_permutations must be positive".to_string(),
            ));
        }
        if stats.min_group_size_for_ic < 3 {
            return Err(GuardError::InvalidConfig(
                "min_group_size_for_ic must be at least 3".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&stats.min_symbol_pass_fraction) {
            return Err(GuardError::InvalidConfig(
                "min_symbol_pass_fraction must be in [0, 1]".to_string(),
            ));
        }

        let cal = &self.calibration;
        if cal.grid_step <= 0.0 || cal.grid_step > 1.0 {
            return Err(GuardError::InvalidConfig("grid_step must be in (0, 1]".to_string()));
        }

        if self.freshness.staleness_hours < 0 {
            return Err(GuardError::InvalidConfig(
                "staleness_hours must not be negative".to_string(),
            ));
        }
        if self.batch.workers == 0 {
            return Err(GuardError::InvalidConfig("workers must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GuardConfig::default();
        assert!((config.divergence.divergence_threshold - 0.20).abs() < f64::EPSILON);
        assert!((config.divergence.alert_warning_threshold - 0.15).abs() < f64::EPSILON);
        assert!((config.divergence.alert_critical_threshold - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.calibration.min_samples_for_calibration, 50);
        assert_eq!(config.freshness.staleness_hours, 24);
        assert_eq!(config.freshness.min_new_evaluations, 20);
        assert_eq!(config.statistics.min_group_size_for_ic, 25);
        assert_eq!(config.statistics.dm_min_origins, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn window_span_includes_validation() {
        let two_way = WalkForwardConfig::new(100, 20, 5);
        assert_eq!(two_way.window_span(), 120);

        let three_way = two_way.with_validation(30);
        assert_eq!(three_way.window_span(), 150);
    }

    #[test]
    fn validate_rejects_inverted_alert_thresholds() {
        let mut config = GuardConfig::default();
        config.divergence.alert_warning_threshold = 0.4;
        assert!(matches!(
            config.validate(),
            Err(GuardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_step() {
        let mut config = GuardConfig::default();
        config.walk_forward.step = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{"divergence": {"divergence_threshold": 0.25}}"#;
        let config: GuardConfig = serde_json::from_str(json).unwrap();
        assert!((config.divergence.divergence_threshold - 0.25).abs() < f64::EPSILON);
        assert!((config.divergence.alert_critical_threshold - 0.30).abs() < f64::EPSILON);
        assert_eq!(config.walk_forward.train_size, 126);
    }
}
