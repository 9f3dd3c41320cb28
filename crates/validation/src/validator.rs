use std::collections::BTreeMap;

use chrono::Utc;
use forecast_guard_backtest::{BacktestMetrics, PredictionOutcome, WalkForwardReport};
use forecast_guard_core::{GuardError, GuardResult, StatisticsConfig};
use tracing::{info, warn};

use crate::diebold_mariano::{align_losses, diebold_mariano, DieboldMarianoOutcome};
use crate::gate::{evaluate_gate, GateDecision};
use crate::ic::{rank_ic, RankIcAnalysis};
use crate::permutation::{permutation_test, PermutationOutcome};
use crate::report::ValidationReport;
use crate::types::ScoredObservation;

/// Runs the statistical battery with one shared configuration.
#[derive(Debug, Clone, Default)]
pub struct StatisticalValidator {
    config: StatisticsConfig,
}

impl StatisticalValidator {
    #[must_use]
    pub fn new(config: StatisticsConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    #[must_use]
    pub fn rank_ic(&self, observations: &[ScoredObservation]) -> RankIcAnalysis {
        rank_ic(observations, &self.config)
    }

    #[must_use]
    pub fn permutation_test(&self, observations: &[ScoredObservation]) -> PermutationOutcome {
        permutation_test(observations, &self.config)
    }

    #[must_use]
    pub fn diebold_mariano(&self, differentials: &[f64], horizon: usize) -> DieboldMarianoOutcome {
        diebold_mariano(differentials, horizon, &self.config)
    }

    #[must_use]
    pub fn gate(
        &self,
        differentials_by_symbol: &BTreeMap<String, Vec<f64>>,
        horizon: usize,
    ) -> GateDecision {
        evaluate_gate(differentials_by_symbol, horizon, &self.config)
    }

    /// Validates model runs against baseline runs of the same symbols.
    ///
    /// Symbols without a baseline run are left out of the paired-loss test
    /// but still count towards the IC tests and the pooled metrics. Every
    /// test sees one forecast per origin bar even when test windows overlap.
    ///
    /// # Errors
    /// - `InsufficientData` if `model` is empty.
    /// - `InvalidConfig` if runs disagree on the forecast horizon.
    pub fn validate(
        &self,
        model: &[WalkForwardReport],
        baseline: &[WalkForwardReport],
        periods_per_year: f64,
    ) -> GuardResult<ValidationReport> {
        let first = model.first().ok_or(GuardError::InsufficientData {
            required: 1,
            available: 0,
        })?;
        let horizon = first.horizon;
        if let Some(other) = model
            .iter()
            .chain(baseline)
            .find(|r| r.horizon != horizon)
        {
            return Err(GuardError::InvalidConfig(format!(
                "{} run for {} has horizon {}, expected {horizon}",
                other.forecaster, other.symbol, other.horizon
            )));
        }

        let baseline_by_symbol: BTreeMap<&str, &WalkForwardReport> =
            baseline.iter().map(|r| (r.symbol.as_str(), r)).collect();

        let mut observations = Vec::new();
        let mut pooled: Vec<PredictionOutcome> = Vec::new();
        let mut differentials: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for run in model {
            let predictions = run.origin_test_predictions();
            observations.extend(ScoredObservation::from_outcomes(&run.symbol, &predictions));

            match baseline_by_symbol.get(run.symbol.as_str()) {
                Some(base) => {
                    let paired = align_losses(&predictions, &base.origin_test_predictions());
                    differentials
                        .entry(run.symbol.clone())
                        .or_default()
                        .extend(paired.iter().map(|p| p.differential()));
                }
                None => warn!(
                    symbol = %run.symbol,
                    "No baseline run; excluded from paired-loss test"
                ),
            }

            pooled.extend(predictions);
        }

        pooled.sort_by_key(|p| p.timestamp);
        let metrics = (!pooled.is_empty())
            .then(|| BacktestMetrics::from_outcomes(&pooled, periods_per_year));

        let ic = self.rank_ic(&observations);
        let permutation = self.permutation_test(&observations);
        let gate = self.gate(&differentials, horizon);

        info!(
            symbols = model.len(),
            mean_ic = ic.mean_ic,
            leakage_suspected = permutation.leakage_suspected,
            accepted = gate.accepted,
            "Validation complete"
        );

        Ok(ValidationReport {
            generated_at: Utc::now(),
            forecaster: first.forecaster.clone(),
            baseline: baseline.first().map(|r| r.forecaster.clone()),
            horizon,
            symbols: model.iter().map(|r| r.symbol.clone()).collect(),
            metrics,
            mean_ic: ic.mean_ic,
            rank_ic: ic.result,
            permutation: permutation.result,
            leakage_suspected: permutation.leakage_suspected,
            diebold_mariano: gate.pooled.result.clone(),
            gate,
        })
    }
}
