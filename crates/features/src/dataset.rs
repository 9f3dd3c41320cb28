use forecast_guard_core::{Bar, FeatureVector, GuardError, GuardResult, TrainingSet};

use crate::cache::FeatureCache;
use crate::engineer::FeatureEngineer;
use crate::lookahead::{build_label, LookaheadGuard};

/// Builds aligned samples from `bars`, one per index whose features are
/// warmed up and whose label bar lies inside `bars`.
///
/// # Errors
/// Propagates lookahead violations. Samples still warming up are skipped.
pub fn build_training_set(
    engineer: &FeatureEngineer,
    bars: &[Bar],
    horizon: usize,
    neutral_band: f64,
) -> GuardResult<TrainingSet> {
    collect_samples(engineer, bars, horizon, neutral_band, |index| {
        engineer.produce(bars, index)
    })
}

/// Same samples as [`build_training_set`], with feature cells served from
/// `cache` under `(symbol, timeframe)`.
///
/// # Errors
/// Propagates lookahead violations. Samples still warming up are skipped.
pub fn build_training_set_cached(
    engineer: &FeatureEngineer,
    cache: &mut FeatureCache,
    symbol: &str,
    timeframe: &str,
    bars: &[Bar],
    horizon: usize,
    neutral_band: f64,
) -> GuardResult<TrainingSet> {
    collect_samples(engineer, bars, horizon, neutral_band, |index| {
        cache.get_or_compute(symbol, timeframe, engineer, bars, index)
    })
}

fn collect_samples(
    engineer: &FeatureEngineer,
    bars: &[Bar],
    horizon: usize,
    neutral_band: f64,
    mut features_at: impl FnMut(usize) -> GuardResult<FeatureVector>,
) -> GuardResult<TrainingSet> {
    let mut set = TrainingSet::default();
    let first = engineer.warmup().saturating_sub(1);
    if bars.len() <= horizon {
        return Ok(set);
    }
    let last = bars.len() - horizon;

    for index in first..last {
        let features = match features_at(index) {
            Ok(features) => features,
            Err(GuardError::InsufficientHistory { .. }) => continue,
            Err(e) => return Err(e),
        };
        let label = build_label(bars, index, horizon, neutral_band)?;
        LookaheadGuard::check_record_within(&label, bars.len())?;
        set.push(features, label);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engineer::FeatureSpec;
    use chrono::{Duration, TimeZone, Utc};

    fn trending_bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar::new(start + Duration::days(i as i64), close, close, close, close, 10.0)
            })
            .collect()
    }

    #[test]
    fn samples_start_after_warmup_and_stop_before_horizon() {
        let engineer = FeatureEngineer::new(vec![FeatureSpec::SmaRatio { window: 5 }]);
        let bars = trending_bars(20);
        let set = build_training_set(&engineer, &bars, 3, 0.001).unwrap();

        // indices 4..17
        assert_eq!(set.len(), 13);
        assert_eq!(set.features[0].index, 4);
        assert_eq!(set.labels.last().unwrap().label_source_index, 19);
        assert!(set.labels.iter().all(|l| l.respects_horizon()));
    }

    #[test]
    fn every_label_is_bullish_on_a_rising_series() {
        let engineer = FeatureEngineer::new(vec![FeatureSpec::LogReturn { lag: 1 }]);
        let set = build_training_set(&engineer, &trending_bars(10), 1, 0.001).unwrap();
        assert!(set
            .labels
            .iter()
            .all(|l| l.realized_class == forecast_guard_core::Direction::Bullish));
    }

    #[test]
    fn too_few_bars_yield_empty_set() {
        let engineer = FeatureEngineer::default();
        let set = build_training_set(&engineer, &trending_bars(5), 10, 0.001).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn cached_build_matches_direct_build_across_windows() {
        let engineer = FeatureEngineer::new(vec![
            FeatureSpec::SmaRatio { window: 5 },
            FeatureSpec::EmaRatio { period: 4 },
            FeatureSpec::LogReturn { lag: 2 },
        ]);
        let bars = trending_bars(60);
        let mut cache = FeatureCache::new();

        // Rolling train slices of 30 bars stepping by 5
        for start in (0..=30).step_by(5) {
            let slice = &bars[start..start + 30];
            let cached =
                build_training_set_cached(&engineer, &mut cache, "SPY", "1d", slice, 1, 0.001)
                    .unwrap();
            assert_eq!(cached, build_training_set(&engineer, slice, 1, 0.001).unwrap());
        }

        // Each later slice reuses 25 bars of window-local cells
        assert!(cache.stats().hits > cache.stats().misses);
    }
}
