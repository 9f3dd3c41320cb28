//! Guard against lookahead bias in label construction.
//!
//! A label attached to a sample built at bar `i` must come from a bar at
//! least `horizon` bars later. Any violation is a construction bug: the
//! guard reports it as [`GuardError::LookaheadViolation`], which callers
//! must propagate and never swallow.

use forecast_guard_core::{Bar, Direction, GuardError, GuardResult, LabelRecord};
use tracing::error;

pub struct LookaheadGuard;

impl LookaheadGuard {
    /// Resolves the label source index for a sample at `feature_index` and
    /// verifies it is separated by at least `horizon` bars.
    ///
    /// # Errors
    /// - `InsufficientData` when the label bar does not exist yet.
    /// - `LookaheadViolation` when the label bar is not strictly later in
    ///   time than the feature bar.
    pub fn assert_label_gap(
        bars: &[Bar],
        feature_index: usize,
        horizon: usize,
    ) -> GuardResult<usize> {
        let label_index = feature_index + horizon;
        if label_index >= bars.len() {
            return Err(GuardError::InsufficientData {
                required: label_index + 1,
                available: bars.len(),
            });
        }

        if horizon > 0 && bars[label_index].timestamp <= bars[feature_index].timestamp {
            return Err(Self::violation(feature_index, label_index, horizon));
        }

        Ok(label_index)
    }

    /// Validates a label produced elsewhere, for example by a forecaster's
    /// own training-data preparation.
    ///
    /// # Errors
    /// Returns `LookaheadViolation` if `feature_bar_index + horizon > label_source_index`.
    pub fn check_record(label: &LabelRecord) -> GuardResult<()> {
        if label.respects_horizon() {
            Ok(())
        } else {
            Err(Self::violation(
                label.feature_bar_index,
                label.label_source_index,
                label.horizon,
            ))
        }
    }

    /// Validates a label against the slice it was built from: the horizon
    /// gap must hold and the source bar must lie inside the slice.
    ///
    /// # Errors
    /// Returns `LookaheadViolation` on either failure.
    pub fn check_record_within(label: &LabelRecord, available: usize) -> GuardResult<()> {
        Self::check_record(label)?;
        if label.label_source_index >= available {
            return Err(Self::violation(
                label.feature_bar_index,
                label.label_source_index,
                label.horizon,
            ));
        }
        Ok(())
    }

    fn violation(feature_index: usize, label_index: usize, horizon: usize) -> GuardError {
        error!(
            feature_index,
            label_index, horizon, "Lookahead violation detected in label construction"
        );
        GuardError::LookaheadViolation {
            feature_index,
            label_index,
            horizon,
        }
    }
}

/// Builds the realized label for a sample at `feature_index`.
///
/// # Errors
/// Propagates [`LookaheadGuard::assert_label_gap`] failures.
pub fn build_label(
    bars: &[Bar],
    feature_index: usize,
    horizon: usize,
    neutral_band: f64,
) -> GuardResult<LabelRecord> {
    let label_index = LookaheadGuard::assert_label_gap(bars, feature_index, horizon)?;

    let entry = bars[feature_index].close;
    let exit = bars[label_index].close;
    let realized_return = if entry.abs() <= f64::EPSILON {
        0.0
    } else {
        exit / entry - 1.0
    };

    Ok(LabelRecord {
        feature_bar_index: feature_index,
        horizon,
        label_source_index: label_index,
        realized_return,
        realized_class: Direction::from_return(realized_return, neutral_band),
    })
}
