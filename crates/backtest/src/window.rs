//! Walk-forward window generation over an ordered bar sequence.
//!
//! Windows are expressed as half-open index ranges. Window `i` starts
//! training at `i * step` and its train, validation and test ranges are
//! contiguous and ordered:
//!
//! ```text
//! [train_start, train_end) [train_end, val_end) [val_end, test_end)
//! ```
//!
//! Test ranges are truncated at the end of the sequence. A window is only
//! emitted while its test range holds at least `min(test_size, step)` bars,
//! so every stride contributes fresh out-of-sample bars.

use std::ops::Range;

use forecast_guard_core::{GuardError, GuardResult, WalkForwardConfig};
use serde::{Deserialize, Serialize};

/// Split layout of a walk-forward run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Train, then evaluate on test.
    TwoWay,
    /// Train, select on validation, confirm once on test.
    ThreeWay,
}

/// A single walk-forward window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: usize,
    pub train_range: Range<usize>,
    pub validation_range: Option<Range<usize>>,
    pub test_range: Range<usize>,
}

impl Window {
    /// Returns true if ranges are non-empty, disjoint and ordered
    /// train < validation < test.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let train_ok = self.train_range.start < self.train_range.end;
        let test_ok = self.test_range.start < self.test_range.end;
        let ordered = match &self.validation_range {
            Some(val) => {
                self.train_range.end <= val.start
                    && val.start < val.end
                    && val.end <= self.test_range.start
            }
            None => self.train_range.end <= self.test_range.start,
        };
        train_ok && test_ok && ordered
    }

    #[must_use]
    pub const fn mode(&self) -> WindowMode {
        if self.validation_range.is_some() {
            WindowMode::ThreeWay
        } else {
            WindowMode::TwoWay
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowGenerator {
    train_size: usize,
    validation_size: Option<usize>,
    test_size: usize,
    step: usize,
}

impl WindowGenerator {
    #[must_use]
    pub fn new(config: &WalkForwardConfig) -> Self {
        Self {
            train_size: config.train_size,
            validation_size: config.validation_size,
            test_size: config.test_size,
            step: config.step,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> WindowMode {
        if self.validation_size.is_some() {
            WindowMode::ThreeWay
        } else {
            WindowMode::TwoWay
        }
    }

    /// Generates windows over a sequence of `n` bars.
    ///
    /// # Errors
    /// - `InsufficientData` if `n < train + validation + test`.
    /// - `InvalidConfig` if any size or the step is zero.
    pub fn generate(&self, n: usize) -> GuardResult<Vec<Window>> {
        if self.train_size == 0 || self.test_size == 0 || self.step == 0 {
            return Err(GuardError::InvalidConfig(
                "train_size, test_size and step must be positive".to_string(),
            ));
        }
        if self.validation_size == Some(0) {
            return Err(GuardError::InvalidConfig(
                "validation_size must be positive when set".to_string(),
            ));
        }

        let validation = self.validation_size.unwrap_or(0);
        let span = self.train_size + validation + self.test_size;
        if n < span {
            return Err(GuardError::InsufficientData {
                required: span,
                available: n,
            });
        }

        let min_test_bars = self.test_size.min(self.step);
        let mut windows = Vec::new();
        let mut train_start = 0;

        loop {
            let train_end = train_start + self.train_size;
            let validation_end = train_end + validation;
            let test_start = validation_end;
            if test_start + min_test_bars > n {
                break;
            }
            let test_end = (test_start + self.test_size).min(n);

            windows.push(Window {
                id: windows.len(),
                train_range: train_start..train_end,
                validation_range: self.validation_size.map(|_| train_end..validation_end),
                test_range: test_start..test_end,
            });

            train_start += self.step;
        }

        Ok(windows)
    }
}
