//! Rank Information Coefficient grouped by evaluation date.
//!
//! For each date with enough observations the IC is the Spearman rank
//! correlation between score and forward return. Per-date ICs are then
//! aggregated and tested against zero with a one-sample t-test.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use forecast_guard_core::stats::{mean, sample_std, spearman_correlation, two_tailed_p_value};
use forecast_guard_core::StatisticsConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ScoredObservation, StatisticalTestResult};

pub const RANK_IC_TEST: &str = "rank_ic";

/// Scores and forward returns observed on one date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateGroup {
    pub scores: Vec<f64>,
    pub returns: Vec<f64>,
}

impl DateGroup {
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[must_use]
    pub fn ic(&self) -> f64 {
        spearman_correlation(&self.scores, &self.returns)
    }
}

/// Result of the rank IC analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankIcAnalysis {
    /// IC of every date group that met the minimum size, in date order
    pub group_ics: Vec<f64>,
    /// Mean IC across groups
    pub mean_ic: f64,
    /// Sample standard deviation of the group ICs
    pub std_ic: f64,
    /// Groups skipped for being below the minimum size
    pub groups_skipped: usize,
    pub result: StatisticalTestResult,
}

/// Groups observations by date in chronological order.
#[must_use]
pub fn group_by_date(observations: &[ScoredObservation]) -> BTreeMap<NaiveDate, DateGroup> {
    let mut groups: BTreeMap<NaiveDate, DateGroup> = BTreeMap::new();
    for obs in observations {
        let group = groups.entry(obs.date).or_default();
        group.scores.push(obs.score);
        group.returns.push(obs.forward_return);
    }
    groups
}

/// Keeps only groups with at least `min_size` observations.
#[must_use]
pub fn eligible_groups(
    groups: BTreeMap<NaiveDate, DateGroup>,
    min_size: usize,
) -> (Vec<DateGroup>, usize) {
    let total = groups.len();
    let eligible: Vec<DateGroup> = groups
        .into_values()
        .filter(|g| g.len() >= min_size.max(2))
        .collect();
    let skipped = total - eligible.len();
    (eligible, skipped)
}

/// Mean IC across groups.
#[must_use]
pub fn mean_group_ic(groups: &[DateGroup]) -> f64 {
    let ics: Vec<f64> = groups.iter().map(DateGroup::ic).collect();
    mean(&ics)
}

/// Computes the date-grouped rank IC and its t-test against zero.
///
/// Fewer than two eligible groups yields an insufficient-sample result.
#[must_use]
pub fn rank_ic(observations: &[ScoredObservation], config: &StatisticsConfig) -> RankIcAnalysis {
    let (groups, groups_skipped) =
        eligible_groups(group_by_date(observations), config.min_group_size_for_ic);
    let group_ics: Vec<f64> = groups.iter().map(DateGroup::ic).collect();

    debug!(
        groups = group_ics.len(),
        skipped = groups_skipped,
        "Computed per-date rank ICs"
    );

    if group_ics.len() < 2 {
        return RankIcAnalysis {
            mean_ic: mean(&group_ics),
            std_ic: 0.0,
            groups_skipped,
            result: StatisticalTestResult::underpowered(RANK_IC_TEST, group_ics.len(), 2),
            group_ics,
        };
    }

    let n = group_ics.len() as f64;
    let mean_ic = mean(&group_ics);
    let std_ic = sample_std(&group_ics);
    let (t_stat, p_value) = if std_ic <= f64::EPSILON {
        if mean_ic.abs() <= f64::EPSILON {
            (0.0, 1.0)
        } else {
            (mean_ic.signum() * f64::INFINITY, 0.0)
        }
    } else {
        let t = mean_ic / (std_ic / n.sqrt());
        (t, two_tailed_p_value(t, n - 1.0))
    };

    let interpretation = if p_value >= config.alpha {
        format!("mean IC {mean_ic:.4} is not distinguishable from zero")
    } else if mean_ic > 0.0 {
        format!("mean IC {mean_ic:.4} shows significant positive ranking skill")
    } else {
        format!("mean IC {mean_ic:.4} shows significant inverse ranking")
    };

    RankIcAnalysis {
        result: StatisticalTestResult::from_p_value(
            RANK_IC_TEST,
            t_stat,
            p_value,
            group_ics.len(),
            config.alpha,
            interpretation,
        ),
        group_ics,
        mean_ic,
        std_ic,
        groups_skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn config(min_group: usize) -> StatisticsConfig {
        StatisticsConfig {
            min_group_size_for_ic: min_group,
            ..StatisticsConfig::default()
        }
    }

    fn observations(
        dates: usize,
        per_date: usize,
        seed: u64,
        score_of: impl Fn(f64, f64) -> f64,
    ) -> Vec<ScoredObservation> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut out = Vec::new();
        for d in 0..dates {
            let date = start + chrono::Duration::days(d as i64);
            for s in 0..per_date {
                let forward_return: f64 = rng.gen_range(-0.05..0.05);
                let noise: f64 = rng.gen_range(-0.05..0.05);
                out.push(ScoredObservation {
                    date,
                    symbol: format!("S{s}"),
                    score: score_of(forward_return, noise),
                    forward_return,
                });
            }
        }
        out
    }

    #[test]
    fn groups_are_keyed_by_date_in_order() {
        let obs = observations(3, 4, 1, |r, _| r);
        let groups = group_by_date(&obs);
        assert_eq!(groups.len(), 3);
        assert!(groups.values().all(|g| g.len() == 4));
        let dates: Vec<_> = groups.keys().copied().collect();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn small_groups_are_skipped() {
        let mut obs = observations(4, 30, 2, |r, n| r + n);
        obs.extend(observations(1, 5, 3, |r, n| r + n).into_iter().map(|mut o| {
            o.date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
            o
        }));

        let analysis = rank_ic(&obs, &config(25));
        assert_eq!(analysis.group_ics.len(), 4);
        assert_eq!(analysis.groups_skipped, 1);
    }

    #[test]
    fn perfect_ranking_has_unit_ic() {
        let obs = observations(5, 30, 4, |r, n| r * 2.0 + 0.0 * n);
        let analysis = rank_ic(&obs, &config(25));
        assert!((analysis.mean_ic - 1.0).abs() < 1e-12);
        assert!(analysis.result.is_significant);
    }

    #[test]
    fn informative_scores_are_significant() {
        let obs = observations(20, 40, 5, |r, n| r + n);
        let analysis = rank_ic(&obs, &config(25));
        assert!(analysis.mean_ic > 0.3);
        assert!(analysis.result.is_significant);
        assert!(analysis.result.interpretation.contains("positive"));
    }

    #[test]
    fn single_group_is_underpowered() {
        let obs = observations(1, 40, 6, |r, n| r + n);
        let analysis = rank_ic(&obs, &config(25));
        assert!(analysis.result.is_underpowered());
    }
}
