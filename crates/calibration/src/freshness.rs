//! Decides when ensemble weights must be recalibrated.
//!
//! Each `(symbol, horizon)` key is a two-state machine. Weights are FRESH
//! after a calibration and become STALE once both hold:
//! - the last calibration is older than `staleness_hours`
//! - more than `min_new_evaluations` evaluations arrived since then
//!
//! A key with no weights at all always needs calibration. Per-key state sits
//! behind its own mutex so workers handling different symbols never contend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use forecast_guard_core::{FreshnessConfig, GuardError, GuardResult};
use forecast_guard_monitor::{DivergenceContext, DivergenceMonitor};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibrator::{equal_weights, CalibrationResult, CalibrationSplit, WeightCalibrator};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FreshnessKey {
    pub symbol: String,
    pub horizon: usize,
}

impl FreshnessKey {
    pub fn new(symbol: impl Into<String>, horizon: usize) -> Self {
        Self {
            symbol: symbol.into(),
            horizon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    /// No weights have been set yet
    Uncalibrated,
    Fresh,
    Stale,
}

/// Where the active weights came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    /// Accepted by the last calibration
    Calibrated,
    /// Equal weights, either never calibrated or reverted after a rejection
    Default,
    /// Previous weights kept because a recalibration lacked samples
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWeights {
    pub weights: BTreeMap<String, f64>,
    pub source: WeightSource,
    pub calibrated_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of one key's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessSnapshot {
    pub last_calibration_time: Option<DateTime<Utc>>,
    pub evaluation_count_at_last_calibration: usize,
    pub current_evaluation_count: usize,
    pub active: Option<ActiveWeights>,
}

impl FreshnessSnapshot {
    #[must_use]
    pub fn new_evaluations(&self) -> usize {
        self.current_evaluation_count
            .saturating_sub(self.evaluation_count_at_last_calibration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationOutcome {
    /// `None` when the attempt was skipped for lack of samples
    pub result: Option<CalibrationResult>,
    pub active: ActiveWeights,
}

#[derive(Debug, Default)]
struct FreshnessState {
    last_calibration_time: Option<DateTime<Utc>>,
    evaluation_count_at_last_calibration: usize,
    current_evaluation_count: usize,
    active: Option<ActiveWeights>,
}

impl FreshnessState {
    fn status(&self, config: &FreshnessConfig, now: DateTime<Utc>) -> FreshnessStatus {
        let Some(calibrated_at) = self.last_calibration_time.filter(|_| self.active.is_some())
        else {
            return FreshnessStatus::Uncalibrated;
        };
        let aged = now - calibrated_at > Duration::hours(config.staleness_hours);
        let new_evaluations = self
            .current_evaluation_count
            .saturating_sub(self.evaluation_count_at_last_calibration);
        if aged && new_evaluations > config.min_new_evaluations {
            FreshnessStatus::Stale
        } else {
            FreshnessStatus::Fresh
        }
    }

    fn snapshot(&self) -> FreshnessSnapshot {
        FreshnessSnapshot {
            last_calibration_time: self.last_calibration_time,
            evaluation_count_at_last_calibration: self.evaluation_count_at_last_calibration,
            current_evaluation_count: self.current_evaluation_count,
            active: self.active.clone(),
        }
    }
}

// =============================================================================
// Tracker
// =============================================================================

pub struct CalibrationFreshnessTracker {
    config: FreshnessConfig,
    states: RwLock<HashMap<FreshnessKey, Arc<Mutex<FreshnessState>>>>,
}

impl CalibrationFreshnessTracker {
    #[must_use]
    pub fn new(config: FreshnessConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    fn state(&self, key: &FreshnessKey) -> Arc<Mutex<FreshnessState>> {
        if let Some(state) = self.states.read().get(key) {
            return Arc::clone(state);
        }
        let mut states = self.states.write();
        Arc::clone(states.entry(key.clone()).or_default())
    }

    /// Counts `count` new evaluations and returns the running total.
    pub fn record_evaluations(
        &self,
        key: &FreshnessKey,
        count: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let state = self.state(key);
        let mut state = state.lock();
        let before = state.status(&self.config, now);
        state.current_evaluation_count += count;
        let after = state.status(&self.config, now);
        if before != after {
            debug!(
                symbol = %key.symbol,
                horizon = key.horizon,
                ?before,
                ?after,
                "Calibration freshness changed"
            );
        }
        state.current_evaluation_count
    }

    pub fn record_evaluation(&self, key: &FreshnessKey, now: DateTime<Utc>) -> usize {
        self.record_evaluations(key, 1, now)
    }

    #[must_use]
    pub fn status(&self, key: &FreshnessKey, now: DateTime<Utc>) -> FreshnessStatus {
        self.state(key).lock().status(&self.config, now)
    }

    /// True when no weights exist yet, or the weights are both old and
    /// outnumbered by new evaluations.
    #[must_use]
    pub fn needs_recalibration(&self, key: &FreshnessKey, now: DateTime<Utc>) -> bool {
        self.status(key, now) != FreshnessStatus::Fresh
    }

    #[must_use]
    pub fn snapshot(&self, key: &FreshnessKey) -> FreshnessSnapshot {
        self.state(key).lock().snapshot()
    }

    /// Installs the weights from a completed calibration and resets the
    /// evaluation baseline.
    pub fn mark_calibrated(
        &self,
        key: &FreshnessKey,
        result: &CalibrationResult,
        now: DateTime<Utc>,
    ) {
        let state = self.state(key);
        let mut state = state.lock();
        Self::apply(&mut state, result, now);
        debug!(symbol = %key.symbol, horizon = key.horizon, "Calibration freshness reset");
    }

    fn apply(state: &mut FreshnessState, result: &CalibrationResult, now: DateTime<Utc>) {
        state.last_calibration_time = Some(now);
        state.evaluation_count_at_last_calibration = state.current_evaluation_count;
        state.active = Some(ActiveWeights {
            weights: result.weights.clone(),
            source: if result.accepted {
                WeightSource::Calibrated
            } else {
                WeightSource::Default
            },
            calibrated_at: Some(now),
        });
    }

    /// Weights to use now. Keys never calibrated get equal weights.
    #[must_use]
    pub fn active_weights(&self, key: &FreshnessKey, components: &[String]) -> ActiveWeights {
        self.state(key)
            .lock()
            .active
            .clone()
            .unwrap_or_else(|| ActiveWeights {
                weights: equal_weights(components),
                source: WeightSource::Default,
                calibrated_at: None,
            })
    }

    /// Runs one recalibration attempt for `key`, holding the key's lock for
    /// the whole attempt.
    ///
    /// With fewer validation samples than the calibrator's minimum the prior
    /// weights are kept and marked [`WeightSource::Stale`] in the tracker (or
    /// reported as [`WeightSource::Default`] if there were none), and the
    /// freshness baseline is left untouched.
    ///
    /// # Errors
    /// Propagates calibrator errors other than `InsufficientData`.
    #[allow(clippy::too_many_arguments)]
    pub fn recalibrate(
        &self,
        key: &FreshnessKey,
        calibrator: &WeightCalibrator,
        train: &CalibrationSplit,
        validation: &CalibrationSplit,
        test: &CalibrationSplit,
        components: &[String],
        monitor: &mut DivergenceMonitor,
        now: DateTime<Utc>,
    ) -> GuardResult<RecalibrationOutcome> {
        let state = self.state(key);
        let mut state = state.lock();

        let context = DivergenceContext::new(key.symbol.clone(), key.horizon, 0).at(now);
        match calibrator.calibrate(train, validation, test, components, context, monitor) {
            Ok(result) => {
                Self::apply(&mut state, &result, now);
                info!(
                    symbol = %key.symbol,
                    horizon = key.horizon,
                    accepted = result.accepted,
                    "Recalibration complete"
                );
                let active = state.active.clone().unwrap_or_else(|| ActiveWeights {
                    weights: result.weights.clone(),
                    source: WeightSource::Default,
                    calibrated_at: Some(now),
                });
                Ok(RecalibrationOutcome {
                    result: Some(result),
                    active,
                })
            }
            Err(GuardError::InsufficientData {
                required,
                available,
            }) => {
                warn!(
                    symbol = %key.symbol,
                    horizon = key.horizon,
                    required,
                    available,
                    "Too few samples to recalibrate; keeping prior weights"
                );
                let active = match state.active.as_mut() {
                    Some(prior) => {
                        prior.source = WeightSource::Stale;
                        prior.clone()
                    }
                    None => ActiveWeights {
                        weights: equal_weights(components),
                        source: WeightSource::Default,
                        calibrated_at: None,
                    },
                };
                Ok(RecalibrationOutcome {
                    result: None,
                    active,
                })
            }
            Err(e) => Err(e),
        }
    }
}
