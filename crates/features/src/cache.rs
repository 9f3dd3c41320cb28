//! Column-oriented feature cache keyed by (symbol, timeframe, feature).
//!
//! Overlapping walk-forward windows ask for the same feature at the same bar
//! many times, each time through a different train slice. Cells are keyed by
//! bar timestamp so a value computed in one window's slice is served to the
//! next. Only window-local features are cached: an EMA depends on where its
//! slice starts and is recomputed on every call.
//!
//! Cached values assume the bar sequence for a (symbol, timeframe) is
//! immutable; call [`FeatureCache::invalidate`] when it is refetched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use forecast_guard_core::{Bar, FeatureVector, GuardError, GuardResult};
use tracing::debug;

use crate::engineer::FeatureEngineer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub timeframe: String,
    pub feature: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(symbol: &str, timeframe: &str, feature: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            feature: feature.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct FeatureCache {
    columns: HashMap<CacheKey, HashMap<DateTime<Utc>, f64>>,
    stats: CacheStats,
}

impl FeatureCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the feature vector at `index` of `bars`, computing only the
    /// cells not seen before.
    ///
    /// The result always equals `engineer.produce(bars, index)`: warm-up is
    /// checked against `bars` itself before the cache is consulted.
    ///
    /// # Errors
    /// Propagates feature computation errors; failed cells are not cached.
    pub fn get_or_compute(
        &mut self,
        symbol: &str,
        timeframe: &str,
        engineer: &FeatureEngineer,
        bars: &[Bar],
        index: usize,
    ) -> GuardResult<FeatureVector> {
        let timestamp = bars
            .get(index)
            .map(|bar| bar.timestamp)
            .ok_or(GuardError::InsufficientData {
                required: index + 1,
                available: bars.len(),
            })?;
        let mut vector = FeatureVector::new(index);

        for spec in engineer.specs() {
            let name = spec.name();
            if !spec.is_window_local() || index + 1 < spec.warmup() {
                vector.insert(name, spec.compute(bars, index)?);
                continue;
            }

            let column = self
                .columns
                .entry(CacheKey::new(symbol, timeframe, &name))
                .or_default();
            let value = if let Some(cached) = column.get(&timestamp) {
                self.stats.hits += 1;
                *cached
            } else {
                self.stats.misses += 1;
                let computed = spec.compute(bars, index)?;
                column.insert(timestamp, computed);
                computed
            };
            vector.insert(name, value);
        }

        Ok(vector)
    }

    /// Drops every column belonging to `symbol`.
    pub fn invalidate(&mut self, symbol: &str) {
        let before = self.columns.len();
        self.columns.retain(|key, _| key.symbol != symbol);
        debug!(
            symbol,
            dropped = before - self.columns.len(),
            "Invalidated cached feature columns"
        );
    }

    /// Cached value for the cell at the bar stamped `timestamp`, if present.
    #[must_use]
    pub fn peek(&self, key: &CacheKey, timestamp: DateTime<Utc>) -> Option<f64> {
        self.columns.get(key)?.get(&timestamp).copied()
    }

    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engineer::FeatureSpec;
    use chrono::{Duration, TimeZone};

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 50.0 + (i as f64).sin();
                Bar::new(start + Duration::days(i as i64), close, close, close, close, 100.0)
            })
            .collect()
    }

    fn engineer() -> FeatureEngineer {
        FeatureEngineer::new(vec![
            FeatureSpec::SmaRatio { window: 3 },
            FeatureSpec::LogReturn { lag: 1 },
        ])
    }

    #[test]
    fn second_lookup_is_served_from_cache() {
        let mut cache = FeatureCache::new();
        let bars = bars(10);
        let engineer = engineer();

        let first = cache.get_or_compute("AAPL", "1d", &engineer, &bars, 5).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 2 });

        let second = cache.get_or_compute("AAPL", "1d", &engineer, &bars, 5).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 2 });
        assert_eq!(first, second);
    }

    #[test]
    fn cached_values_match_direct_computation() {
        let mut cache = FeatureCache::new();
        let bars = bars(10);
        let engineer = engineer();

        for index in 2..10 {
            let cached = cache.get_or_compute("AAPL", "1d", &engineer, &bars, index).unwrap();
            assert_eq!(cached, engineer.produce(&bars, index).unwrap());
        }
    }

    #[test]
    fn shifted_slices_share_cells() {
        let mut cache = FeatureCache::new();
        let bars = bars(20);
        let engineer = engineer();

        // Bar 8 is index 8 of the first slice and index 4 of the second
        let first = cache.get_or_compute("AAPL", "1d", &engineer, &bars[..12], 8).unwrap();
        let second = cache.get_or_compute("AAPL", "1d", &engineer, &bars[4..16], 4).unwrap();

        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 2 });
        assert_eq!(first.values, second.values);
        assert_eq!(second, engineer.produce(&bars[4..16], 4).unwrap());
    }

    #[test]
    fn warmup_is_checked_against_the_given_slice() {
        let mut cache = FeatureCache::new();
        let bars = bars(20);
        let engineer = engineer();

        cache.get_or_compute("AAPL", "1d", &engineer, &bars, 6).unwrap();
        // Bar 6 is index 0 of this slice, still inside the warm-up
        assert!(cache.get_or_compute("AAPL", "1d", &engineer, &bars[6..], 0).is_err());
    }

    #[test]
    fn ema_is_never_cached() {
        let mut cache = FeatureCache::new();
        let bars = bars(30);
        let engineer = FeatureEngineer::new(vec![FeatureSpec::EmaRatio { period: 5 }]);

        let full = cache.get_or_compute("AAPL", "1d", &engineer, &bars, 20).unwrap();
        let sliced = cache.get_or_compute("AAPL", "1d", &engineer, &bars[10..], 10).unwrap();

        assert_eq!(cache.column_count(), 0);
        assert_eq!(full, engineer.produce(&bars, 20).unwrap());
        assert_eq!(sliced, engineer.produce(&bars[10..], 10).unwrap());
    }

    #[test]
    fn keys_separate_symbols_and_timeframes() {
        let mut cache = FeatureCache::new();
        let bars = bars(10);
        let engineer = engineer();

        cache.get_or_compute("AAPL", "1d", &engineer, &bars, 4).unwrap();
        cache.get_or_compute("AAPL", "1h", &engineer, &bars, 4).unwrap();
        cache.get_or_compute("MSFT", "1d", &engineer, &bars, 4).unwrap();
        assert_eq!(cache.column_count(), 6);

        cache.invalidate("AAPL");
        assert_eq!(cache.column_count(), 2);
        assert!(cache
            .peek(&CacheKey::new("MSFT", "1d", "sma_ratio_3"), bars[4].timestamp)
            .is_some());
    }

    #[test]
    fn warmup_failures_are_not_cached() {
        let mut cache = FeatureCache::new();
        let bars = bars(10);
        let engineer = engineer();

        assert!(cache.get_or_compute("AAPL", "1d", &engineer, &bars, 0).is_err());
        assert!(cache
            .peek(&CacheKey::new("AAPL", "1d", "sma_ratio_3"), bars[0].timestamp)
            .is_none());
    }
}
