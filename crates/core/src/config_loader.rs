use std::path::Path;

use crate::config::GuardConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::debug;

pub const ENV_PREFIX: &str = "FORECAST_GUARD_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging defaults, `config/ForecastGuard.toml`
    /// and `FORECAST_GUARD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed or fails validation.
    pub fn load() -> Result<GuardConfig> {
        Self::load_from("config/ForecastGuard.toml")
    }

    /// Loads configuration from a specific TOML file. A missing file leaves
    /// the defaults in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed or fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<GuardConfig> {
        let path = path.as_ref();
        debug!(path = %path.display(), found = path.exists(), "Loading configuration");
        let figment = Figment::from(Serialized::defaults(GuardConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(&figment)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Loads configuration from an in-memory TOML document layered over defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or fails validation.
    pub fn load_from_str(toml: &str) -> Result<GuardConfig> {
        let figment =
            Figment::from(Serialized::defaults(GuardConfig::default())).merge(Toml::string(toml));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<GuardConfig> {
        let config: GuardConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
