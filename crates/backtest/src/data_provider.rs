use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forecast_guard_core::{Bar, BarStore};
use tracing::debug;

/// Reads bars from `{root}/{symbol}_{timeframe}.csv`.
///
/// Expected columns: `timestamp,open,high,low,close,volume` with an RFC 3339
/// timestamp and a header row.
#[derive(Debug, Clone)]
pub struct CsvBarStore {
    root: PathBuf,
}

impl CsvBarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.root.join(format!("{symbol}_{timeframe}.csv"))
    }

    /// Parses a CSV file into bars sorted by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The CSV file cannot be opened
    /// - A row has fewer than six columns
    /// - Timestamp or number parsing fails
    pub fn read_file(path: &Path) -> Result<Vec<Bar>> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut bars = Vec::new();

        for (row, result) in reader.records().enumerate() {
            let record = result?;
            if record.len() < 6 {
                anyhow::bail!("{}: row {row} has {} columns", path.display(), record.len());
            }
            let timestamp: DateTime<Utc> = record[0]
                .parse()
                .with_context(|| format!("{}: bad timestamp in row {row}", path.display()))?;
            let field = |i: usize| -> Result<f64> {
                record[i]
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("{}: bad number in row {row}", path.display()))
            };

            bars.push(Bar::new(
                timestamp,
                field(1)?,
                field(2)?,
                field(3)?,
                field(4)?,
                field(5)?,
            ));
        }

        Ok(normalize(bars))
    }
}

#[async_trait]
impl BarStore for CsvBarStore {
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let path = self.path_for(symbol, timeframe);
        let bars = tokio::task::spawn_blocking(move || Self::read_file(&path)).await??;
        debug!(symbol, timeframe, bars = bars.len(), "Loaded bars from CSV");
        Ok(take_last(bars, limit))
    }
}

/// Bar store backed by preloaded sequences keyed by `(symbol, timeframe)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBarStore {
    series: HashMap<(String, String), Vec<Bar>>,
}

impl InMemoryBarStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timeframe: &str, bars: Vec<Bar>) {
        self.series
            .insert((symbol.to_string(), timeframe.to_string()), normalize(bars));
    }

    #[must_use]
    pub fn with_series(mut self, symbol: &str, timeframe: &str, bars: Vec<Bar>) -> Self {
        self.insert(symbol, timeframe, bars);
        self
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>> {
        let bars = self
            .series
            .get(&(symbol.to_string(), timeframe.to_string()))
            .with_context(|| format!("No bars for {symbol} {timeframe}"))?;
        Ok(take_last(bars.clone(), limit))
    }
}

/// Sorts by timestamp and keeps the last bar for each duplicate timestamp.
fn normalize(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

fn take_last(mut bars: Vec<Bar>, limit: usize) -> Vec<Bar> {
    if bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "timestamp,open,high,low,close,volume
2024-01-03T00:00:00Z,102,103,101,102.5,1000
2024-01-01T00:00:00Z,100,101,99,100.5,1000
2024-01-02T00:00:00Z,101,102,100,101.5,1000
2024-01-02T00:00:00Z,101,102,100,101.7,1200
";

    fn write_csv(dir: &Path, name: &str, body: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn csv_store_sorts_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "BTC_1d.csv", CSV);
        let store = CsvBarStore::new(dir.path());

        let bars = store.fetch("BTC", "1d", 100).await.unwrap();

        assert_eq!(bars.len(), 3);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!((bars[1].close - 101.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn limit_keeps_most_recent_bars() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "BTC_1d.csv", CSV);
        let store = CsvBarStore::new(dir.path());

        let bars = store.fetch("BTC", "1d", 2).await.unwrap();
        assert_eq!(bars.len(), 2);
        assert!((bars[1].close - 102.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvBarStore::new(dir.path());
        assert!(store.fetch("ETH", "1h", 10).await.is_err());
    }

    #[tokio::test]
    async fn malformed_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "BTC_1d.csv",
            "timestamp,open,high,low,close,volume\n2024-01-01T00:00:00Z,1,2,3,abc,5\n",
        );
        let store = CsvBarStore::new(dir.path());
        assert!(store.fetch("BTC", "1d", 10).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_store_returns_inserted_series() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "X_1d.csv", CSV);
        let bars = CsvBarStore::read_file(&dir.path().join("X_1d.csv")).unwrap();

        let store = InMemoryBarStore::new().with_series("X", "1d", bars.clone());
        assert_eq!(store.fetch("X", "1d", 10).await.unwrap(), bars);
        assert!(store.fetch("Y", "1d", 10).await.is_err());
    }
}
