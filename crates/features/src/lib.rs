//! Feature construction and labelling that never reads past the sample's
//! own bar.

pub mod cache;
pub mod dataset;
pub mod engineer;
pub mod indicators;
pub mod lookahead;

pub use cache::{CacheKey, CacheStats, FeatureCache};
pub use dataset::{build_training_set, build_training_set_cached};
pub use engineer::{FeatureEngineer, FeatureSpec};
pub use lookahead::{build_label, LookaheadGuard};
