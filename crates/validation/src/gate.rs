//! Acceptance gate for a model change.
//!
//! A change is accepted only when all of the following hold:
//! 1. The pooled Diebold-Mariano test is significant
//! 2. The pooled mean loss differential is negative
//! 3. At least `min_symbol_pass_fraction` of symbols individually have a
//!    negative mean differential
//!
//! The breadth requirement stops one outlier symbol from carrying a pooled
//! pass on its own.

use std::collections::BTreeMap;

use forecast_guard_core::stats::mean;
use forecast_guard_core::StatisticsConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::diebold_mariano::{diebold_mariano, DieboldMarianoOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub accepted: bool,
    /// Pooled test over every symbol's differentials
    pub pooled: DieboldMarianoOutcome,
    /// Mean differential per symbol
    pub symbol_means: BTreeMap<String, f64>,
    /// Fraction of symbols with a negative mean differential
    pub pass_fraction: f64,
    /// Why the gate rejected, empty when accepted
    pub reasons: Vec<String>,
}

/// Evaluates the gate over per-symbol loss differential series.
#[must_use]
pub fn evaluate_gate(
    differentials_by_symbol: &BTreeMap<String, Vec<f64>>,
    horizon: usize,
    config: &StatisticsConfig,
) -> GateDecision {
    let pooled_series: Vec<f64> = differentials_by_symbol
        .values()
        .flat_map(|d| d.iter().copied())
        .collect();
    let pooled = diebold_mariano(&pooled_series, horizon, config);

    let symbol_means: BTreeMap<String, f64> = differentials_by_symbol
        .iter()
        .filter(|(_, d)| !d.is_empty())
        .map(|(symbol, d)| (symbol.clone(), mean(d)))
        .collect();
    let improved = symbol_means.values().filter(|m| **m < 0.0).count();
    let pass_fraction = if symbol_means.is_empty() {
        0.0
    } else {
        improved as f64 / symbol_means.len() as f64
    };

    let mut reasons = Vec::new();
    if pooled.result.is_underpowered() {
        reasons.push(pooled.result.interpretation.clone());
    } else if !pooled.result.is_significant {
        reasons.push(format!(
            "paired-loss test not significant (p = {:.4})",
            pooled.result.p_value
        ));
    }
    if !pooled.model_is_better() {
        reasons.push(format!(
            "pooled mean differential {:.6} is not negative",
            pooled.mean_differential
        ));
    }
    if pass_fraction < config.min_symbol_pass_fraction {
        reasons.push(format!(
            "{improved} of {} symbols improved ({:.0}% < {:.0}%)",
            symbol_means.len(),
            pass_fraction * 100.0,
            config.min_symbol_pass_fraction * 100.0
        ));
    }

    let accepted = reasons.is_empty();
    if accepted {
        info!(
            symbols = symbol_means.len(),
            pass_fraction, "Acceptance gate passed"
        );
    } else {
        warn!(reasons = ?reasons, "Acceptance gate rejected change");
    }

    GateDecision {
        accepted,
        pooled,
        symbol_means,
        pass_fraction,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn series(rng: &mut ChaCha8Rng, n: usize, low: f64, high: f64) -> Vec<f64> {
        (0..n).map(|_| rng.gen_range(low..high)).collect()
    }

    #[test]
    fn broad_improvement_is_accepted() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut by_symbol = BTreeMap::new();
        for symbol in ["AAA", "BBB", "CCC", "DDD", "EEE"] {
            by_symbol.insert(symbol.to_string(), series(&mut rng, 60, -0.3, 0.1));
        }

        let decision = evaluate_gate(&by_symbol, 1, &StatisticsConfig::default());

        assert!(decision.accepted, "{:?}", decision.reasons);
        assert!((decision.pass_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_outlier_symbol_cannot_carry_the_pool() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut by_symbol = BTreeMap::new();
        by_symbol.insert("AAA".to_string(), series(&mut rng, 200, -2.0, -1.0));
        for symbol in ["BBB", "CCC", "DDD", "EEE"] {
            by_symbol.insert(symbol.to_string(), series(&mut rng, 50, 0.0, 0.2));
        }

        let decision = evaluate_gate(&by_symbol, 1, &StatisticsConfig::default());

        assert!(decision.pooled.model_is_better());
        assert!(decision.pooled.result.is_significant);
        assert!(!decision.accepted);
        assert!((decision.pass_fraction - 0.2).abs() < 1e-12);
        assert!(decision.reasons.iter().any(|r| r.contains("symbols improved")));
    }

    #[test]
    fn underpowered_pool_is_rejected() {
        let mut by_symbol = BTreeMap::new();
        by_symbol.insert("AAA".to_string(), vec![-0.5; 30]);
        let decision = evaluate_gate(&by_symbol, 1, &StatisticsConfig::default());
        assert!(!decision.accepted);
        assert!(decision.pooled.result.is_underpowered());
        assert!(decision.reasons[0].starts_with("insufficient sample"));
    }

    #[test]
    fn empty_input_is_rejected() {
        let decision = evaluate_gate(&BTreeMap::new(), 1, &StatisticsConfig::default());
        assert!(!decision.accepted);
        assert_eq!(decision.pass_fraction, 0.0);
    }
}
