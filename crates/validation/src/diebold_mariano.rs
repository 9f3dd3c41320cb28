//! Diebold-Mariano paired-loss test against a baseline forecaster.
//!
//! With per-origin losses `L_model` and `L_baseline`, the loss differential
//! is `d_t = L_model - L_baseline`. The test is one-sided: the model must
//! have a significantly negative mean differential. The variance of the
//! mean uses a Newey-West estimate with `horizon - 1` lags, since
//! overlapping `h`-step forecasts produce serially correlated losses.

use std::collections::BTreeMap;

use forecast_guard_backtest::{first_forecast_per_origin, PredictionOutcome};
use forecast_guard_core::stats::{mean, normal_cdf};
use forecast_guard_core::StatisticsConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::StatisticalTestResult;

pub const DIEBOLD_MARIANO_TEST: &str = "diebold_mariano";

/// Losses of the model and the baseline at one forecast origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedLoss {
    pub window_id: usize,
    pub index: usize,
    pub model_loss: f64,
    pub baseline_loss: f64,
}

impl PairedLoss {
    #[must_use]
    pub fn differential(&self) -> f64 {
        self.model_loss - self.baseline_loss
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DieboldMarianoOutcome {
    pub mean_differential: f64,
    /// Newey-West long-run variance of the differential
    pub long_run_variance: f64,
    pub lags: usize,
    pub result: StatisticalTestResult,
}

impl DieboldMarianoOutcome {
    /// True when the model's mean loss is below the baseline's.
    #[must_use]
    pub fn model_is_better(&self) -> bool {
        self.mean_differential < 0.0
    }
}

/// Pairs model and baseline predictions made at the same origin.
///
/// Each series is first reduced to one forecast per origin bar, so
/// overlapping test windows do not enter the differential more than once.
/// Origins present in only one series are dropped. Loss is the squared
/// error of the directional score.
#[must_use]
pub fn align_losses(
    model: &[PredictionOutcome],
    baseline: &[PredictionOutcome],
) -> Vec<PairedLoss> {
    let baseline_by_origin: BTreeMap<usize, f64> = first_forecast_per_origin(baseline)
        .iter()
        .map(|o| (o.index, o.squared_error()))
        .collect();

    first_forecast_per_origin(model)
        .iter()
        .filter_map(|o| {
            baseline_by_origin
                .get(&o.index)
                .map(|baseline_loss| PairedLoss {
                    window_id: o.window_id,
                    index: o.index,
                    model_loss: o.squared_error(),
                    baseline_loss: *baseline_loss,
                })
        })
        .collect()
}

/// Newey-West long-run variance with Bartlett weights.
#[must_use]
pub fn newey_west_variance(values: &[f64], lags: usize) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let m = mean(values);
    let autocovariance = |k: usize| -> f64 {
        values[k..]
            .iter()
            .zip(values)
            .map(|(a, b)| (a - m) * (b - m))
            .sum::<f64>()
            / n as f64
    };

    let mut variance = autocovariance(0);
    for k in 1..=lags.min(n - 1) {
        let weight = 1.0 - k as f64 / (lags as f64 + 1.0);
        variance += 2.0 * weight * autocovariance(k);
    }
    variance.max(0.0)
}

/// Tests whether `mean(d) < 0` for the loss differential series `d`.
///
/// Below `config.dm_min_origins` the result is reported as an insufficient
/// sample rather than a pass or fail.
#[must_use]
pub fn diebold_mariano(
    differentials: &[f64],
    horizon: usize,
    config: &StatisticsConfig,
) -> DieboldMarianoOutcome {
    let n = differentials.len();
    let lags = horizon.saturating_sub(1);
    let mean_differential = mean(differentials);

    if n < config.dm_min_origins || n < 2 {
        return DieboldMarianoOutcome {
            mean_differential,
            long_run_variance: 0.0,
            lags,
            result: StatisticalTestResult::underpowered(
                DIEBOLD_MARIANO_TEST,
                n,
                config.dm_min_origins.max(2),
            ),
        };
    }

    let long_run_variance = newey_west_variance(differentials, lags);
    let standard_error = (long_run_variance / n as f64).sqrt();

    let (statistic, p_value) = if standard_error <= f64::EPSILON {
        // Constant differential.
        if mean_differential < -f64::EPSILON {
            (f64::NEG_INFINITY, 0.0)
        } else if mean_differential > f64::EPSILON {
            (f64::INFINITY, 1.0)
        } else {
            (0.0, 1.0)
        }
    } else {
        let dm = mean_differential / standard_error;
        (dm, normal_cdf(dm))
    };

    debug!(
        origins = n,
        mean_differential, statistic, p_value, "Diebold-Mariano test complete"
    );

    let interpretation = if p_value < config.alpha && mean_differential < 0.0 {
        format!("model loss significantly below baseline (mean d = {mean_differential:.6})")
    } else {
        format!("no significant improvement over baseline (mean d = {mean_differential:.6})")
    };

    DieboldMarianoOutcome {
        mean_differential,
        long_run_variance,
        lags,
        result: StatisticalTestResult::from_p_value(
            DIEBOLD_MARIANO_TEST,
            statistic,
            p_value,
            n,
            config.alpha,
            interpretation,
        ),
    }
}
