//! Naive forecasters used as paired-loss baselines.

use std::sync::Arc;

use forecast_guard_core::{
    Bar, ClassProbabilities, Direction, ForecasterAdapter, GuardError, GuardResult, Prediction,
    TrainingSet,
};
use forecast_guard_features::{
    build_training_set, build_training_set_cached, FeatureCache, FeatureEngineer, FeatureSpec,
};
use parking_lot::Mutex;

/// Feature cache shared by every forecaster built for one batch.
pub type SharedFeatureCache = Arc<Mutex<FeatureCache>>;

#[derive(Debug, Clone)]
struct CacheSlot {
    cache: SharedFeatureCache,
    symbol: String,
    timeframe: String,
}

/// Predicts that the direction of the last `lookback` bars repeats.
#[derive(Debug, Clone)]
pub struct PersistenceForecaster {
    lookback: usize,
    neutral_band: f64,
    engineer: FeatureEngineer,
    cache: Option<CacheSlot>,
    trained: bool,
}

impl PersistenceForecaster {
    pub const NAME: &'static str = "persistence";

    #[must_use]
    pub fn new(lookback: usize, neutral_band: f64) -> Self {
        let lookback = lookback.max(1);
        Self {
            lookback,
            neutral_band,
            engineer: FeatureEngineer::new(vec![FeatureSpec::LogReturn { lag: lookback }]),
            cache: None,
            trained: false,
        }
    }

    /// Serves training features from `cache` under `(symbol, timeframe)`, so
    /// overlapping train windows compute each cell once.
    #[must_use]
    pub fn with_cache(mut self, cache: SharedFeatureCache, symbol: &str, timeframe: &str) -> Self {
        self.cache = Some(CacheSlot {
            cache,
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
        });
        self
    }
}

impl ForecasterAdapter for PersistenceForecaster {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn prepare_training_data(&self, bars: &[Bar], horizon: usize) -> GuardResult<TrainingSet> {
        match &self.cache {
            Some(slot) => {
                let mut cache = slot.cache.lock();
                build_training_set_cached(
                    &self.engineer,
                    &mut cache,
                    &slot.symbol,
                    &slot.timeframe,
                    bars,
                    horizon,
                    self.neutral_band,
                )
            }
            None => build_training_set(&self.engineer, bars, horizon, self.neutral_band),
        }
    }

    fn train(&mut self, data: &TrainingSet, min_samples: usize) -> GuardResult<()> {
        if data.len() < min_samples {
            self.trained = false;
            return Err(GuardError::training(
                Self::NAME,
                format!("{} samples, need {min_samples}", data.len()),
            ));
        }
        self.trained = true;
        Ok(())
    }

    fn predict(&self, bars: &[Bar]) -> GuardResult<Prediction> {
        if !self.trained {
            return Err(GuardError::prediction(Self::NAME, "not trained"));
        }
        if bars.len() <= self.lookback {
            return Err(GuardError::prediction(
                Self::NAME,
                format!("need {} bars, got {}", self.lookback + 1, bars.len()),
            ));
        }

        let last = bars[bars.len() - 1].close;
        let prior = bars[bars.len() - 1 - self.lookback].close;
        let recent_return = if prior.abs() <= f64::EPSILON {
            0.0
        } else {
            last / prior - 1.0
        };
        let label = Direction::from_return(recent_return, self.neutral_band);

        Ok(Prediction::new(label, 1.0, ClassProbabilities::certain(label)))
    }
}

/// Predicts a zero return at every origin: neutral with score 0.
#[derive(Debug, Clone)]
pub struct NoChangeForecaster {
    neutral_band: f64,
    engineer: FeatureEngineer,
    trained: bool,
}

impl NoChangeForecaster {
    pub const NAME: &'static str = "no_change";

    #[must_use]
    pub fn new(neutral_band: f64) -> Self {
        Self {
            neutral_band,
            engineer: FeatureEngineer::new(Vec::new()),
            trained: false,
        }
    }
}

impl ForecasterAdapter for NoChangeForecaster {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn prepare_training_data(&self, bars: &[Bar], horizon: usize) -> GuardResult<TrainingSet> {
        build_training_set(&self.engineer, bars, horizon, self.neutral_band)
    }

    fn train(&mut self, data: &TrainingSet, min_samples: usize) -> GuardResult<()> {
        self.trained = data.len() >= min_samples;
        if !self.trained {
            return Err(GuardError::training(
                Self::NAME,
                format!("{} samples, need {min_samples}", data.len()),
            ));
        }
        Ok(())
    }

    fn predict(&self, _bars: &[Bar]) -> GuardResult<Prediction> {
        if !self.trained {
            return Err(GuardError::prediction(Self::NAME, "not trained"));
        }
        Ok(Prediction::new(
            Direction::Neutral,
            1.0,
            ClassProbabilities::certain(Direction::Neutral),
        ))
    }
}
