//! Error taxonomy shared by every forecast-guard crate.
//!
//! Only [`GuardError::LookaheadViolation`] is fatal. Every other kind is
//! caught at a window or symbol boundary, recorded with its reason and
//! processing continues.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    #[error("Insufficient data: need at least {required} bars, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Insufficient history for feature '{feature}' at index {index}: requires {required} bars")]
    InsufficientHistory {
        feature: String,
        index: usize,
        required: usize,
    },

    #[error("Lookahead violation: label source index {label_index} is closer than horizon {horizon} to feature index {feature_index}")]
    LookaheadViolation {
        feature_index: usize,
        label_index: usize,
        horizon: usize,
    },

    #[error("Forecaster '{forecaster}' failed to train: {reason}")]
    ForecasterTrainingFailure { forecaster: String, reason: String },

    #[error("Forecaster '{forecaster}' failed to predict: {reason}")]
    ForecasterPredictionFailure { forecaster: String, reason: String },

    #[error("Window exceeded time budget: {elapsed_ms}ms > {budget_ms}ms")]
    TimeBudgetExceeded { elapsed_ms: u64, budget_ms: u64 },

    #[error("Statistical test '{test}' underpowered: {available} samples, {required} required")]
    StatisticalUnderpowered {
        test: String,
        available: usize,
        required: usize,
    },

    #[error("Non-finite value for metric '{metric}'")]
    NonFiniteMetric { metric: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GuardError {
    /// A lookahead violation is a construction bug and must abort the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LookaheadViolation { .. })
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
            Self::LookaheadViolation { .. } => ErrorKind::LookaheadViolation,
            Self::ForecasterTrainingFailure { .. } => ErrorKind::ForecasterTrainingFailure,
            Self::ForecasterPredictionFailure { .. } => ErrorKind::ForecasterPredictionFailure,
            Self::TimeBudgetExceeded { .. } => ErrorKind::TimeBudgetExceeded,
            Self::StatisticalUnderpowered { .. } => ErrorKind::StatisticalUnderpowered,
            Self::NonFiniteMetric { .. } => ErrorKind::NonFiniteMetric,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    pub fn training(forecaster: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ForecasterTrainingFailure {
            forecaster: forecaster.into(),
            reason: reason.to_string(),
        }
    }

    pub fn prediction(forecaster: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ForecasterPredictionFailure {
            forecaster: forecaster.into(),
            reason: reason.to_string(),
        }
    }
}

/// Serializable discriminant of [`GuardError`], used in skip records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientData,
    InsufficientHistory,
    LookaheadViolation,
    ForecasterTrainingFailure,
    ForecasterPredictionFailure,
    TimeBudgetExceeded,
    StatisticalUnderpowered,
    NonFiniteMetric,
    InvalidConfig,
}
