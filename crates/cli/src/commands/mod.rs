//! Subcommands of the `forecast-guard` binary.

pub mod batch;
pub mod walk_forward;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use forecast_guard_core::{ConfigLoader, GuardConfig};

pub use batch::{run_batch, BatchArgs};
pub use walk_forward::{run_walk_forward, WalkForwardArgs};

/// Config used when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "config/ForecastGuard.toml";

/// Window geometry and config options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// Directory holding `{symbol}_{timeframe}.csv` files
    #[arg(long, env = "FORECAST_GUARD_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Bar timeframe used in file names (e.g. 1d, 1h)
    #[arg(long, default_value = "1d")]
    pub timeframe: String,

    /// Training window length in bars
    #[arg(long)]
    pub train: usize,

    /// Test window length in bars
    #[arg(long)]
    pub test: usize,

    /// Bars to advance between windows
    #[arg(long)]
    pub step: usize,

    /// Validation window length in bars; enables divergence monitoring
    #[arg(long)]
    pub validation: Option<usize>,

    /// Forecast horizon in bars
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Lookback of the persistence forecaster, in bars
    #[arg(long, default_value = "1")]
    pub lookback: usize,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl WindowArgs {
    /// Loads the layered config and applies command-line overrides.
    pub fn load_config(&self) -> Result<GuardConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = ConfigLoader::load_from(&path)?;

        let wf = &mut config.walk_forward;
        wf.train_size = self.train;
        wf.test_size = self.test;
        wf.step = self.step;
        if self.validation.is_some() {
            wf.validation_size = self.validation;
        }
        if let Some(horizon) = self.horizon {
            wf.horizon = horizon;
        }

        config
            .validate()
            .context("Invalid window options")?;
        Ok(config)
    }
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Parses an output format from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!(
                "Unknown format: '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fmt::Write as _;
    use std::path::Path;

    use chrono::{Duration, TimeZone, Utc};

    use super::WindowArgs;

    /// Writes `{symbol}_1d.csv` with a slowly oscillating daily close.
    pub(crate) fn write_series(dir: &Path, symbol: &str, n: usize, phase: f64) {
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        let mut csv = String::from("timestamp,open,high,low,close,volume\n");
        let mut close = 100.0_f64;
        for i in 0..n {
            let open = close;
            close *= 1.0 + 0.01 * ((i as f64) * 0.35 + phase).sin();
            let ts = (start + Duration::days(i as i64)).to_rfc3339();
            let _ = writeln!(
                csv,
                "{ts},{open},{},{},{close},1000",
                open.max(close),
                open.min(close)
            );
        }
        std::fs::write(dir.join(format!("{symbol}_1d.csv")), csv).unwrap();
    }

    pub(crate) fn window_args(dir: &Path) -> WindowArgs {
        WindowArgs {
            data_dir: dir.to_path_buf(),
            timeframe: "1d".to_string(),
            train: 120,
            test: 5,
            step: 5,
            validation: None,
            horizon: None,
            lookback: 1,
            config: Some(dir.join("missing.toml")),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::window_args;
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("text").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("TXT").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("xml").is_err());
    }

    #[test]
    fn test_cli_overrides_window_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = window_args(dir.path());
        args.validation = Some(20);
        args.horizon = Some(3);

        let config = args.load_config().unwrap();
        assert_eq!(config.walk_forward.train_size, 120);
        assert_eq!(config.walk_forward.validation_size, Some(20));
        assert_eq!(config.walk_forward.horizon, 3);
    }

    #[test]
    fn test_config_file_supplies_untouched_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(
            &path,
            "[walk_forward]\nvalidation_size = 15\nhorizon = 2\n\n[statistics]\nalpha = 0.01\n",
        )
        .unwrap();
        let mut args = window_args(dir.path());
        args.config = Some(path);

        let config = args.load_config().unwrap();
        assert_eq!(config.walk_forward.validation_size, Some(15));
        assert_eq!(config.walk_forward.horizon, 2);
        assert!((config.statistics.alpha - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = window_args(dir.path());
        args.step = 0;
        assert!(args.load_config().is_err());
    }
}
