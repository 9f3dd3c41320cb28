//! Statistical validation of walk-forward forecasts.
//!
//! Three independent tests are provided:
//! - Rank information coefficient grouped by evaluation date
//! - Within-date permutation test used as a leakage detector
//! - Diebold-Mariano paired-loss test against a baseline
//!
//! The acceptance gate combines the paired-loss test with a per-symbol
//! breadth requirement.

pub mod diebold_mariano;
pub mod gate;
pub mod ic;
pub mod permutation;
pub mod report;
pub mod types;
pub mod validator;

pub use diebold_mariano::{align_losses, diebold_mariano, DieboldMarianoOutcome, PairedLoss};
pub use gate::{evaluate_gate, GateDecision};
pub use ic::{group_by_date, rank_ic, RankIcAnalysis};
pub use permutation::{permutation_test, PermutationOutcome};
pub use report::ValidationReport;
pub use types::{ScoredObservation, StatisticalTestResult, Verdict};
pub use validator::StatisticalValidator;
