pub mod bar;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod model;
pub mod stats;
pub mod traits;

pub use bar::{Bar, Direction};
pub use config::{
    BatchConfig, CalibrationConfig, DivergenceConfig, FeatureConfig, FreshnessConfig, GuardConfig,
    StatisticsConfig, WalkForwardConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ErrorKind, GuardError, GuardResult};
pub use model::{ClassProbabilities, FeatureVector, LabelRecord, Prediction, TrainingSet};
pub use traits::{BarStore, ForecasterAdapter, ForecasterFactory};
