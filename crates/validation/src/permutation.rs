//! Within-date permutation test for the rank IC.
//!
//! Forward returns are shuffled inside each date group, which keeps the
//! cross-sectional return distribution of every date intact while breaking
//! any link to the scores. Repeating this builds an empirical null for the
//! mean IC. An observed IC far outside that null is more likely a leak of
//! future information into the scores than genuine skill.

use forecast_guard_core::stats::{mean, sample_std};
use forecast_guard_core::StatisticsConfig;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ic::{eligible_groups, group_by_date, mean_group_ic, DateGroup};
use crate::types::{ScoredObservation, StatisticalTestResult};

pub const PERMUTATION_TEST: &str = "permutation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationOutcome {
    /// Mean IC on the unshuffled data
    pub observed_ic: f64,
    /// Mean of the permuted statistics
    pub null_mean: f64,
    /// Standard deviation of the permuted statistics
    pub null_std: f64,
    /// Distance of the observed IC from the null in null standard deviations
    pub z_score: f64,
    pub n_permutations: usize,
    /// True when `|z_score|` reaches the configured leakage threshold
    pub leakage_suspected: bool,
    /// Carries the empirical p-value
    pub result: StatisticalTestResult,
}

/// Runs the permutation test with `config.n_permutations` shuffles.
///
/// The empirical p-value is the fraction of permuted statistics whose
/// magnitude is at least the observed one. A fixed `permutation_seed` makes
/// the test reproducible.
#[must_use]
pub fn permutation_test(
    observations: &[ScoredObservation],
    config: &StatisticsConfig,
) -> PermutationOutcome {
    let (groups, _) = eligible_groups(group_by_date(observations), config.min_group_size_for_ic);
    let mut rng = match config.permutation_seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    run(&groups, config, &mut rng)
}

fn run(
    groups: &[DateGroup],
    config: &StatisticsConfig,
    rng: &mut ChaCha8Rng,
) -> PermutationOutcome {
    let n_permutations = config.n_permutations;

    if groups.is_empty() || n_permutations == 0 {
        return PermutationOutcome {
            observed_ic: 0.0,
            null_mean: 0.0,
            null_std: 0.0,
            z_score: 0.0,
            n_permutations,
            leakage_suspected: false,
            result: StatisticalTestResult::underpowered(
                PERMUTATION_TEST,
                groups.len().min(n_permutations),
                1,
            ),
        };
    }

    let observed_ic = mean_group_ic(groups);
    let mut shuffled: Vec<DateGroup> = groups.to_vec();
    let mut null = Vec::with_capacity(n_permutations);

    for _ in 0..n_permutations {
        for group in &mut shuffled {
            group.returns.shuffle(rng);
        }
        null.push(mean_group_ic(&shuffled));
    }

    let extreme = null
        .iter()
        .filter(|stat| stat.abs() >= observed_ic.abs() - f64::EPSILON)
        .count();
    let p_value = extreme as f64 / n_permutations as f64;

    let null_mean = mean(&null);
    let null_std = sample_std(&null);
    let z_score = if null_std <= f64::EPSILON {
        0.0
    } else {
        (observed_ic - null_mean) / null_std
    };
    let leakage_suspected = z_score.abs() >= config.leakage_z_threshold;

    debug!(
        observed_ic,
        null_mean, null_std, z_score, p_value, "Permutation test complete"
    );

    let interpretation = if leakage_suspected {
        warn!(
            observed_ic,
            z_score, "Observed IC is implausibly extreme; suspected data leakage"
        );
        format!(
            "observed IC {observed_ic:.4} lies {z_score:.1} null standard deviations out; suspected data leakage"
        )
    } else if p_value < config.alpha {
        format!("observed IC {observed_ic:.4} exceeds the shuffled null")
    } else {
        format!("observed IC {observed_ic:.4} is consistent with shuffled labels")
    };

    PermutationOutcome {
        observed_ic,
        null_mean,
        null_std,
        z_score,
        n_permutations,
        leakage_suspected,
        result: StatisticalTestResult::from_p_value(
            PERMUTATION_TEST,
            observed_ic,
            p_value,
            n_permutations,
            config.alpha,
            interpretation,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::Rng;

    fn config(n_permutations: usize, seed: u64) -> StatisticsConfig {
        StatisticsConfig {
            n_permutations,
            permutation_seed: Some(seed),
            min_group_size_for_ic: 25,
            ..StatisticsConfig::default()
        }
    }

    fn observations(
        rng: &mut ChaCha8Rng,
        dates: usize,
        per_date: usize,
        score_of: impl Fn(f64, f64) -> f64,
    ) -> Vec<ScoredObservation> {
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

    // ============================================================
    // Null behaviour
    // ============================================================

    #[test]
    fn uninformative_scores_give_roughly_uniform_p_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let trials = 60;
        let mut p_values = Vec::with_capacity(trials);

        for trial in 0..trials {
            let obs = observations(&mut rng, 5, 30, |_, noise| noise);
            let outcome = permutation_test(&obs, &config(200, trial as u64));
            p_values.push(outcome.result.p_value);
        }

        let mean_p = mean(&p_values);
        let below_5pct = p_values.iter().filter(|p| **p < 0.05).count();
        let upper_half = p_values.iter().filter(|p| **p >= 0.5).count();

        assert!((0.35..=0.65).contains(&mean_p), "mean p = {mean_p}");
        assert!(below_5pct <= 12, "{below_5pct} of {trials} below 0.05");
        assert!((15..=45).contains(&upper_half), "{upper_half} of {trials} above 0.5");
    }

    #[test]
    fn same_seed_is_reproducible() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let obs = observations(&mut rng, 4, 30, |r, n| r + 3.0 * n);
        let a = permutation_test(&obs, &config(100, 99));
        let b = permutation_test(&obs, &config(100, 99));
        assert_eq!(a, b);
    }

    // ============================================================
    // Leakage detection
    // ============================================================

    #[test]
    fn score_equal_to_future_return_is_flagged_as_leakage() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let obs = observations(&mut rng, 5, 30, |r, _| r);
        let outcome = permutation_test(&obs, &config(300, 1));

        assert!((outcome.observed_ic - 1.0).abs() < 1e-9);
        assert!(outcome.leakage_suspected);
        assert!(outcome.result.p_value < 0.01);
        assert!(outcome.result.interpretation.contains("leakage"));
    }

    #[test]
    fn weak_genuine_signal_is_not_flagged() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let obs = observations(&mut rng, 5, 30, |r, n| r + 6.0 * n);
        let outcome = permutation_test(&obs, &config(300, 2));

        assert!(!outcome.leakage_suspected);
        assert!(outcome.z_score.abs() < 6.0);
    }

    #[test]
    fn no_eligible_groups_is_underpowered() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let obs = observations(&mut rng, 3, 10, |r, _| r);
        let outcome = permutation_test(&obs, &config(100, 3));
        assert!(outcome.result.is_underpowered());
        assert!(!outcome.leakage_suspected);
    }
}
