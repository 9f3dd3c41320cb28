pub mod divergence;

pub use divergence::{
    compute_divergence, DivergenceContext, DivergenceMonitor, DivergenceRecord, DivergenceSummary,
    Severity, THRESHOLD_TOLERANCE,
};
