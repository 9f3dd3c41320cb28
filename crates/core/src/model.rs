//! Records exchanged between feature construction, forecasters and the
//! walk-forward engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bar::Direction;

/// Feature values computed at a single bar index.
///
/// Every value is a function of `bars[..=index]` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub index: usize,
    pub values: BTreeMap<String, f64>,
}

impl FeatureVector {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A realized label attached to a training or evaluation sample.
///
/// Invariant: `feature_bar_index + horizon <= label_source_index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub feature_bar_index: usize,
    pub horizon: usize,
    pub label_source_index: usize,
    pub realized_return: f64,
    pub realized_class: Direction,
}

impl LabelRecord {
    #[must_use]
    pub const fn respects_horizon(&self) -> bool {
        self.feature_bar_index + self.horizon <= self.label_source_index
    }
}

/// Aligned features and labels handed to a forecaster for training.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<LabelRecord>,
}

impl TrainingSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn push(&mut self, features: FeatureVector, label: LabelRecord) {
        self.features.push(features);
        self.labels.push(label);
    }
}

/// Class probabilities in the order bullish, neutral, bearish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub bullish: f64,
    pub neutral: f64,
    pub bearish: f64,
}

impl ClassProbabilities {
    #[must_use]
    pub const fn certain(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Self {
                bullish: 1.0,
                neutral: 0.0,
                bearish: 0.0,
            },
            Direction::Neutral => Self {
                bullish: 0.0,
                neutral: 1.0,
                bearish: 0.0,
            },
            Direction::Bearish => Self {
                bullish: 0.0,
                neutral: 0.0,
                bearish: 1.0,
            },
        }
    }

    #[must_use]
    pub const fn of(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Bullish => self.bullish,
            Direction::Neutral => self.neutral,
            Direction::Bearish => self.bearish,
        }
    }
}

/// Output of [`crate::ForecasterAdapter::predict`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Direction,
    pub confidence: f64,
    pub probabilities: ClassProbabilities,
}

impl Prediction {
    #[must_use]
    pub const fn new(label: Direction, confidence: f64, probabilities: ClassProbabilities) -> Self {
        Self {
            label,
            confidence,
            probabilities,
        }
    }

    /// Signed directional score in `[-1, 1]`, used for rank IC.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.probabilities.bullish - self.probabilities.bearish
    }
}
