//! Walk-forward evaluation across many symbols.
//!
//! Symbols run concurrently on a bounded number of workers. Each worker owns
//! its forecaster and its divergence monitor, and nothing is shared between
//! symbols while they run. Histories are merged into the caller's monitor in
//! symbol order once every worker has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use forecast_guard_core::{
    BarStore, BatchConfig, DivergenceConfig, ErrorKind, ForecasterFactory, GuardError,
};
use forecast_guard_monitor::{DivergenceMonitor, DivergenceRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::WalkForwardEngine;
use crate::report::WalkForwardReport;

/// Cooperative cancellation checked between symbols.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    /// `None` when the failure came from the bar store or a crashed worker.
    pub kind: Option<ErrorKind>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<WalkForwardReport>,
    pub failures: Vec<SymbolFailure>,
    /// Symbols never started because the batch was cancelled.
    pub cancelled: Vec<String>,
}

impl BatchReport {
    #[must_use]
    pub fn report_for(&self, symbol: &str) -> Option<&WalkForwardReport> {
        self.reports.iter().find(|r| r.symbol == symbol)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

enum SymbolOutcome {
    Completed(Box<WalkForwardReport>, Vec<DivergenceRecord>),
    Failed(SymbolFailure),
    Fatal(GuardError),
    Cancelled,
}

pub struct BatchRunner {
    store: Arc<dyn BarStore>,
    factory: Arc<dyn ForecasterFactory>,
    engine: WalkForwardEngine,
    divergence: DivergenceConfig,
    batch: BatchConfig,
    cancel: CancellationFlag,
}

impl BatchRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn BarStore>,
        factory: Arc<dyn ForecasterFactory>,
        engine: WalkForwardEngine,
        divergence: DivergenceConfig,
        batch: BatchConfig,
    ) -> Self {
        Self {
            store,
            factory,
            engine,
            divergence,
            batch,
            cancel: CancellationFlag::new(),
        }
    }

    /// Handle that stops the batch before its next symbol starts.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Evaluates every symbol and merges divergence records into `monitor`.
    ///
    /// Per-symbol failures are collected in the report. A lookahead violation
    /// in any symbol cancels the remaining symbols and is returned as the
    /// error, so the batch produces no results.
    ///
    /// # Errors
    /// Returns the first fatal [`GuardError`] encountered.
    pub async fn run(
        &self,
        symbols: &[String],
        monitor: &mut DivergenceMonitor,
    ) -> Result<BatchReport> {
        let semaphore = Arc::new(Semaphore::new(self.batch.workers.max(1)));
        let mut tasks = JoinSet::new();

        info!(
            symbols = symbols.len(),
            workers = self.batch.workers.max(1),
            timeframe = %self.batch.timeframe,
            "Starting batch walk-forward"
        );

        for (position, symbol) in symbols.iter().enumerate() {
            let task = SymbolTask {
                store: Arc::clone(&self.store),
                factory: Arc::clone(&self.factory),
                engine: self.engine.clone(),
                divergence: self.divergence.clone(),
                timeframe: self.batch.timeframe.clone(),
                limit: self.batch.bar_limit,
                cancel: self.cancel.clone(),
                symbol: symbol.clone(),
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (position, task.evaluate().await)
            });
        }

        let mut outcomes: Vec<Option<SymbolOutcome>> = symbols.iter().map(|_| None).collect();
        let mut fatal: Option<GuardError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => {
                    if let SymbolOutcome::Fatal(e) = &outcome {
                        if fatal.is_none() {
                            error!(symbol = %symbols[position], error = %e, "Cancelling batch");
                            self.cancel.cancel();
                            fatal = Some(e.clone());
                        }
                    }
                    outcomes[position] = Some(outcome);
                }
                Err(e) => warn!(error = %e, "Batch worker did not complete"),
            }
        }

        if let Some(e) = fatal {
            return Err(e.into());
        }

        let mut report = BatchReport {
            reports: Vec::new(),
            failures: Vec::new(),
            cancelled: Vec::new(),
        };
        for (symbol, outcome) in symbols.iter().zip(outcomes) {
            match outcome {
                Some(SymbolOutcome::Completed(run, history)) => {
                    monitor.merge(history);
                    report.reports.push(*run);
                }
                Some(SymbolOutcome::Failed(failure)) => report.failures.push(failure),
                Some(SymbolOutcome::Cancelled) => report.cancelled.push(symbol.clone()),
                Some(SymbolOutcome::Fatal(_)) => {}
                None => report.failures.push(SymbolFailure {
                    symbol: symbol.clone(),
                    kind: None,
                    reason: "worker did not complete".to_string(),
                }),
            }
        }

        info!(
            completed = report.reports.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled.len(),
            "Batch walk-forward complete"
        );

        Ok(report)
    }
}

struct SymbolTask {
    store: Arc<dyn BarStore>,
    factory: Arc<dyn ForecasterFactory>,
    engine: WalkForwardEngine,
    divergence: DivergenceConfig,
    timeframe: String,
    limit: usize,
    cancel: CancellationFlag,
    symbol: String,
}

impl SymbolTask {
    async fn evaluate(self) -> SymbolOutcome {
        if self.cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        let bars = match self
            .store
            .fetch(&self.symbol, &self.timeframe, self.limit)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Failed to load bars");
                return SymbolOutcome::Failed(SymbolFailure {
                    symbol: self.symbol,
                    kind: None,
                    reason: format!("{e:#}"),
                });
            }
        };

        if self.cancel.is_cancelled() {
            return SymbolOutcome::Cancelled;
        }

        let mut forecaster = self.factory.create(&self.symbol);
        let engine = self.engine;
        let divergence = self.divergence;
        let symbol = self.symbol.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let mut monitor = DivergenceMonitor::new(divergence);
            engine
                .run(&symbol, &bars, forecaster.as_mut(), Some(&mut monitor))
                .map(|report| (report, monitor.into_history()))
        })
        .await;

        match joined {
            Ok(Ok((report, history))) => {
                info!(
                    symbol = %self.symbol,
                    succeeded = report.summary.succeeded,
                    skipped = report.summary.skipped,
                    "Symbol complete"
                );
                SymbolOutcome::Completed(Box::new(report), history)
            }
            Ok(Err(e)) if e.is_fatal() => SymbolOutcome::Fatal(e),
            Ok(Err(e)) => {
                warn!(symbol = %self.symbol, error = %e, "Symbol failed");
                SymbolOutcome::Failed(SymbolFailure {
                    symbol: self.symbol,
                    kind: Some(e.kind()),
                    reason: e.to_string(),
                })
            }
            Err(e) => SymbolOutcome::Failed(SymbolFailure {
                symbol: self.symbol,
                kind: None,
                reason: format!("worker panicked: {e}"),
            }),
        }
    }
}
