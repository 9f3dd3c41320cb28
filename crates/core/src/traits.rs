use crate::bar::Bar;
use crate::error::GuardResult;
use crate::model::{Prediction, TrainingSet};
use anyhow::Result;
use async_trait::async_trait;

/// Capability interface every pluggable forecaster implements.
///
/// The walk-forward engine only ever talks to forecasters through this
/// trait and never branches on the concrete model type.
pub trait ForecasterAdapter: Send {
    fn name(&self) -> &str;

    /// Builds aligned features and labels from `bars`. Indices in the
    /// returned records are relative to the slice.
    ///
    /// # Errors
    /// Returns an error if features or labels cannot be constructed.
    fn prepare_training_data(&self, bars: &[Bar], horizon: usize) -> GuardResult<TrainingSet>;

    /// Fits the model from scratch, discarding any prior state.
    ///
    /// # Errors
    /// Returns an error if training fails or fewer than `min_samples` are given.
    fn train(&mut self, data: &TrainingSet, min_samples: usize) -> GuardResult<()>;

    /// Predicts the direction following the last bar of `bars`.
    ///
    /// # Errors
    /// Returns an error if the model is untrained or features are unavailable.
    fn predict(&self, bars: &[Bar]) -> GuardResult<Prediction>;
}

/// Source of ordered, de-duplicated bar sequences.
#[async_trait]
pub trait BarStore: Send + Sync {
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>>;
}

/// Builds a fresh forecaster for each symbol evaluated by a batch.
pub trait ForecasterFactory: Send + Sync {
    fn create(&self, symbol: &str) -> Box<dyn ForecasterAdapter>;
}

impl<F> ForecasterFactory for F
where
    F: Fn(&str) -> Box<dyn ForecasterAdapter> + Send + Sync,
{
    fn create(&self, symbol: &str) -> Box<dyn ForecasterAdapter> {
        self(symbol)
    }
}
