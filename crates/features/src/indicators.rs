//! Indicator formulas evaluated at a single index.
//!
//! Each function reads `values[..=index]` only and returns `None` when the
//! window does not fit before `index`.

/// Simple moving average over `values[index + 1 - window..=index]`.
#[must_use]
pub fn sma(values: &[f64], index: usize, window: usize) -> Option<f64> {
    if window == 0 || index >= values.len() || index + 1 < window {
        return None;
    }
    let slice = &values[index + 1 - window..=index];
    Some(slice.iter().sum::<f64>() / window as f64)
}

/// Exponential moving average seeded with the SMA of the first `period`
/// values and rolled forward to `index`.
#[must_use]
pub fn ema(values: &[f64], index: usize, period: usize) -> Option<f64> {
    let seed = sma(values, period.checked_sub(1)?, period)?;
    if index + 1 < period || index >= values.len() {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = seed;
    for value in &values[period..=index] {
        current = alpha * value + (1.0 - alpha) * current;
    }
    Some(current)
}

/// Relative strength index over the last `period` changes.
///
/// Clamps to 100 when there are no losses and returns 50 for a flat window,
/// so the result is always finite.
#[must_use]
pub fn rsi(values: &[f64], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= values.len() || index < period {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in index + 1 - period..=index {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss <= f64::EPSILON {
        return Some(if avg_gain <= f64::EPSILON { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// Log return from `index - lag` to `index`. Non-positive prices yield 0.
#[must_use]
pub fn log_return(values: &[f64], index: usize, lag: usize) -> Option<f64> {
    if lag == 0 || index >= values.len() || index < lag {
        return None;
    }
    let prev = values[index - lag];
    let curr = values[index];
    if prev <= 0.0 || curr <= 0.0 {
        return Some(0.0);
    }
    Some((curr / prev).ln())
}

/// Sample standard deviation of one-bar log returns over `window` changes.
#[must_use]
pub fn realized_volatility(values: &[f64], index: usize, window: usize) -> Option<f64> {
    if window < 2 || index >= values.len() || index < window {
        return None;
    }
    let returns: Vec<f64> = (index + 1 - window..=index)
        .filter_map(|i| log_return(values, i, 1))
        .collect();
    Some(forecast_guard_core::stats::sample_std(&returns))
}

/// Current value relative to its trailing mean. A zero mean yields 1.
#[must_use]
pub fn volume_ratio(values: &[f64], index: usize, window: usize) -> Option<f64> {
    let avg = sma(values, index, window)?;
    if avg.abs() <= f64::EPSILON {
        return Some(1.0);
    }
    Some(values[index] / avg)
}
