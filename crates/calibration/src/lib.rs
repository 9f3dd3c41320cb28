//! Ensemble weight calibration that never trusts weights it has not checked
//! on held-out data, plus the bookkeeping that decides when to recalibrate.

pub mod calibrator;
pub mod freshness;

pub use calibrator::{
    equal_weights, CalibrationResult, CalibrationSplit, SearchStrategy, WeightCalibrator,
};
pub use freshness::{
    ActiveWeights, CalibrationFreshnessTracker, FreshnessKey, FreshnessSnapshot, FreshnessStatus,
    RecalibrationOutcome, WeightSource,
};
