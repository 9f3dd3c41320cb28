//! Feature vectors computed from bars at or before an index.

use forecast_guard_core::{Bar, FeatureVector, GuardError, GuardResult};
use serde::{Deserialize, Serialize};

use crate::indicators;

/// A single feature and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSpec {
    /// `close / SMA(window) - 1`
    SmaRatio { window: usize },
    /// `close / EMA(period) - 1`
    EmaRatio { period: usize },
    Rsi { period: usize },
    LogReturn { lag: usize },
    Volatility { window: usize },
    VolumeRatio { window: usize },
}

impl FeatureSpec {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::SmaRatio { window } => format!("sma_ratio_{window}"),
            Self::EmaRatio { period } => format!("ema_ratio_{period}"),
            Self::Rsi { period } => format!("rsi_{period}"),
            Self::LogReturn { lag } => format!("log_return_{lag}"),
            Self::Volatility { window } => format!("volatility_{window}"),
            Self::VolumeRatio { window } => format!("volume_ratio_{window}"),
        }
    }

    /// Number of bars (`index + 1`) required before the feature is defined.
    #[must_use]
    pub const fn warmup(&self) -> usize {
        match self {
            Self::SmaRatio { window } | Self::VolumeRatio { window } => *window,
            Self::EmaRatio { period } => *period,
            Self::Rsi { period } => *period + 1,
            Self::LogReturn { lag } => *lag + 1,
            Self::Volatility { window } => *window + 1,
        }
    }

    /// True when the value past warm-up reads only the last `warmup()` bars,
    /// so it does not depend on where the series starts.
    #[must_use]
    pub const fn is_window_local(&self) -> bool {
        !matches!(self, Self::EmaRatio { .. })
    }

    /// Evaluates the feature at `index` using `bars[..=index]`.
    ///
    /// # Errors
    /// Returns `InsufficientHistory` when `index` is inside the warm-up.
    pub fn compute(&self, bars: &[Bar], index: usize) -> GuardResult<f64> {
        if index >= bars.len() {
            return Err(GuardError::InsufficientData {
                required: index + 1,
                available: bars.len(),
            });
        }
        if index + 1 < self.warmup() {
            return Err(self.insufficient(index));
        }

        // Only bars up to and including `index` are ever materialized.
        let visible = &bars[..=index];
        let closes: Vec<f64> = visible.iter().map(|b| b.close).collect();
        let close = closes[index];

        let value = match self {
            Self::SmaRatio { window } => {
                indicators::sma(&closes, index, *window).map(|avg| ratio(close, avg))
            }
            Self::EmaRatio { period } => {
                indicators::ema(&closes, index, *period).map(|avg| ratio(close, avg))
            }
            Self::Rsi { period } => indicators::rsi(&closes, index, *period),
            Self::LogReturn { lag } => indicators::log_return(&closes, index, *lag),
            Self::Volatility { window } => {
                indicators::realized_volatility(&closes, index, *window)
            }
            Self::VolumeRatio { window } => {
                let volumes: Vec<f64> = visible.iter().map(|b| b.volume).collect();
                indicators::volume_ratio(&volumes, index, *window)
            }
        };

        value.ok_or_else(|| self.insufficient(index))
    }

    fn insufficient(&self, index: usize) -> GuardError {
        GuardError::InsufficientHistory {
            feature: self.name(),
            index,
            required: self.warmup(),
        }
    }
}

fn ratio(value: f64, base: f64) -> f64 {
    if base.abs() <= f64::EPSILON {
        0.0
    } else {
        value / base - 1.0
    }
}

/// Deterministic, side-effect-free producer of [`FeatureVector`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEngineer {
    specs: Vec<FeatureSpec>,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(vec![
            FeatureSpec::SmaRatio { window: 5 },
            FeatureSpec::SmaRatio { window: 20 },
            FeatureSpec::EmaRatio { period: 12 },
            FeatureSpec::Rsi { period: 14 },
            FeatureSpec::LogReturn { lag: 1 },
            FeatureSpec::LogReturn { lag: 5 },
            FeatureSpec::Volatility { window: 20 },
            FeatureSpec::VolumeRatio { window: 20 },
        ])
    }
}

impl FeatureEngineer {
    #[must_use]
    pub fn new(specs: Vec<FeatureSpec>) -> Self {
        Self { specs }
    }

    #[must_use]
    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    /// Bars required before every feature is defined.
    #[must_use]
    pub fn warmup(&self) -> usize {
        self.specs.iter().map(FeatureSpec::warmup).max().unwrap_or(1)
    }

    /// Computes all features at `index`.
    ///
    /// # Errors
    /// Returns `InsufficientHistory` if any feature is still warming up.
    pub fn produce(&self, bars: &[Bar], index: usize) -> GuardResult<FeatureVector> {
        let mut vector = FeatureVector::new(index);
        for spec in &self.specs {
            vector.insert(spec.name(), spec.compute(bars, index)?);
        }
        Ok(vector)
    }
}
