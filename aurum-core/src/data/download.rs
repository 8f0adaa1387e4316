//! Download orchestrator. Batches tickers, retries failures, skips cached
//! files and records a summary of the run.
//!
//! Every ticker is isolated: exhausting its attempts marks it `FAILED` and the
//! run moves on. Only a cancellation request stops a run early.

use super::progress::DownloadProgress;
use super::provider::{DataError, DataProvider};
use super::store::{self, StoreError, WrittenPaths};
use super::summary::{self, DownloadOutcome, DownloadStatus};
use crate::config::DownloadConfig;
use crate::ticker::Ticker;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a single fetch-and-persist attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] DataError),

    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),
}

/// Cooperative cancellation, polled between tickers and between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which gap in the run a pause fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// After each processed ticker.
    BetweenTickers,
    /// After a failed attempt that will be retried.
    BetweenAttempts,
    /// Between two batches; never after the last one.
    BetweenBatches,
}

/// Waits out the pauses of a run.
pub trait Pacer: Send + Sync {
    fn pause(&self, kind: Pause, delay: Duration);
}

/// Sleeps the current thread.
pub struct ThreadSleep;

impl Pacer for ThreadSleep {
    fn pause(&self, _kind: Pause, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Result of one orchestrator run.
#[derive(Debug)]
pub struct DownloadReport {
    /// One outcome per processed ticker, in input order.
    pub outcomes: Vec<DownloadOutcome>,
    /// Where the run summary was written; `None` if recording it failed.
    pub summary_path: Option<PathBuf>,
    /// True when the run stopped early; unprocessed tickers have no outcome.
    pub cancelled: bool,
}

impl DownloadReport {
    fn count(&self, status: DownloadStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(DownloadStatus::Ok)
    }

    pub fn skipped(&self) -> usize {
        self.count(DownloadStatus::SkippedCached)
    }

    pub fn failed(&self) -> usize {
        self.count(DownloadStatus::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == DownloadStatus::Failed)
    }
}

/// Download every ticker into `dir`, in batches of `config.batch_size`.
///
/// Per ticker: skip when the parquet file exists (unless
/// `config.force_redownload`), otherwise try fetch+persist up to
/// `config.max_attempts` times with a fixed `ticker_delay` between attempts.
/// `ticker_delay` also separates tickers and `batch_delay` separates batches.
/// The outcomes are recorded with [`summary::record`] before returning.
pub fn download_tickers(
    provider: &dyn DataProvider,
    dir: &Path,
    tickers: &[Ticker],
    config: &DownloadConfig,
    progress: &dyn DownloadProgress,
    cancel: Option<&CancelFlag>,
) -> DownloadReport {
    download_tickers_paced(provider, dir, tickers, config, progress, cancel, &ThreadSleep)
}

/// [`download_tickers`] with the pauses handed to `pacer` instead of sleeping.
pub fn download_tickers_paced(
    provider: &dyn DataProvider,
    dir: &Path,
    tickers: &[Ticker],
    config: &DownloadConfig,
    progress: &dyn DownloadProgress,
    cancel: Option<&CancelFlag>,
    pacer: &dyn Pacer,
) -> DownloadReport {
    let total = tickers.len();
    let batch_size = config.batch_size.max(1);
    let batches: Vec<&[Ticker]> = tickers.chunks(batch_size).collect();
    let is_cancelled = || cancel.is_some_and(CancelFlag::is_cancelled);

    tracing::info!(
        provider = provider.name(),
        tickers = total,
        batches = batches.len(),
        start = %config.default_start,
        dir = %dir.display(),
        "starting download run"
    );

    let mut outcomes = Vec::with_capacity(total);
    let mut cancelled = false;

    'batches: for (b, batch) in batches.iter().enumerate() {
        if is_cancelled() {
            cancelled = true;
            break;
        }
        progress.on_batch_start(b, batches.len(), batch.len());

        for ticker in batch.iter() {
            if is_cancelled() {
                cancelled = true;
                break 'batches;
            }

            let index = outcomes.len();
            progress.on_start(ticker.as_str(), index, total);
            let outcome = process_ticker(provider, dir, ticker, config, progress, pacer);
            progress.on_complete(&outcome, index, total);
            outcomes.push(outcome);

            pacer.pause(Pause::BetweenTickers, config.ticker_delay());
        }

        if b + 1 < batches.len() {
            pacer.pause(Pause::BetweenBatches, config.batch_delay());
        }
    }

    if cancelled {
        tracing::warn!(
            processed = outcomes.len(),
            remaining = total - outcomes.len(),
            "download run cancelled"
        );
    }

    let summary_path = match summary::record(&outcomes, dir, None) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!(error = %e, "failed to record download summary");
            None
        }
    };

    let report = DownloadReport {
        outcomes,
        summary_path,
        cancelled,
    };
    progress.on_run_complete(report.succeeded(), report.skipped(), report.failed(), total);
    report
}

/// Resolve one ticker to its final outcome.
fn process_ticker(
    provider: &dyn DataProvider,
    dir: &Path,
    ticker: &Ticker,
    config: &DownloadConfig,
    progress: &dyn DownloadProgress,
    pacer: &dyn Pacer,
) -> DownloadOutcome {
    if !config.force_redownload && store::exists(ticker, dir) {
        return DownloadOutcome::skipped(ticker.as_str());
    }

    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match fetch_and_store(provider, dir, ticker, config) {
            Ok(written) => {
                tracing::debug!(%ticker, attempt, path = %written.parquet.display(), "stored");
                return DownloadOutcome::ok(ticker.as_str());
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < max_attempts {
                    progress.on_retry(ticker.as_str(), attempt, max_attempts, &last_error);
                    pacer.pause(Pause::BetweenAttempts, config.ticker_delay());
                }
            }
        }
    }

    DownloadOutcome::failed(ticker.as_str(), last_error)
}

/// Fetch then persist. Both must succeed for the attempt to count.
fn fetch_and_store(
    provider: &dyn DataProvider,
    dir: &Path,
    ticker: &Ticker,
    config: &DownloadConfig,
) -> Result<WrittenPaths, AttemptError> {
    let series = provider.fetch(ticker, config.default_start)?;
    Ok(store::write(&series, ticker, dir, config.save_csv)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::progress::NoProgress;
    use crate::data::provider::{Bar, TimeSeries};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn tickers(names: &[&str]) -> Vec<Ticker> {
        names
            .iter()
            .map(|n| Ticker::from_normalized(n).unwrap())
            .collect()
    }

    fn one_bar() -> TimeSeries {
        TimeSeries::new(vec![Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adj_close: 1.0,
            volume: 1,
        }])
    }

    /// Succeeds for everything, optionally cancelling after the n-th fetch.
    struct CancellingProvider {
        calls: Mutex<usize>,
        cancel_after: usize,
        flag: CancelFlag,
    }

    impl DataProvider for CancellingProvider {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn fetch(&self, _ticker: &Ticker, _start: NaiveDate) -> Result<TimeSeries, DataError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls >= self.cancel_after {
                self.flag.cancel();
            }
            Ok(one_bar())
        }
    }

    /// Returns an empty series, which the store refuses to persist.
    struct EmptyProvider;

    impl DataProvider for EmptyProvider {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch(&self, _ticker: &Ticker, _start: NaiveDate) -> Result<TimeSeries, DataError> {
            Ok(TimeSeries::default())
        }
    }

    fn config() -> DownloadConfig {
        DownloadConfig {
            batch_size: 2,
            max_attempts: 3,
            save_csv: false,
            ..DownloadConfig::default()
        }
        .without_delays()
    }

    #[test]
    fn cancellation_stops_between_tickers() {
        let dir = tempfile::tempdir().unwrap();
        let flag = CancelFlag::new();
        let provider = CancellingProvider {
            calls: Mutex::new(0),
            cancel_after: 3,
            flag: flag.clone(),
        };

        let report = download_tickers(
            &provider,
            dir.path(),
            &tickers(&["AAAA3.SA", "BBBB3.SA", "CCCC3.SA", "DDDD3.SA", "EEEE3.SA"]),
            &config(),
            &NoProgress,
            Some(&flag),
        );

        assert!(report.cancelled);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.all_succeeded());
        assert!(report.summary_path.is_some());
    }

    #[test]
    fn cancelled_before_start_records_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let flag = CancelFlag::new();
        flag.cancel();

        let report = download_tickers(
            &EmptyProvider,
            dir.path(),
            &tickers(&["AAAA3.SA"]),
            &config(),
            &NoProgress,
            Some(&flag),
        );

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        let recorded = summary::load(report.summary_path.as_ref().unwrap()).unwrap();
        assert!(recorded.is_empty());
    }

    #[test]
    fn persistence_failure_is_a_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let report = download_tickers(
            &EmptyProvider,
            dir.path(),
            &tickers(&["EMPT3.SA"]),
            &config(),
            &NoProgress,
            None,
        );

        assert_eq!(report.failed(), 1);
        let outcome = &report.outcomes[0];
        assert!(outcome.reason.starts_with("persist failed"), "{}", outcome.reason);
        assert!(!store::exists(&tickers(&["EMPT3.SA"])[0], dir.path()));
    }

    #[test]
    fn zero_batch_size_and_attempts_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DownloadConfig {
            batch_size: 0,
            max_attempts: 0,
            ..config()
        };
        let report = download_tickers(
            &EmptyProvider,
            dir.path(),
            &tickers(&["AAAA3.SA", "BBBB3.SA"]),
            &cfg,
            &NoProgress,
            None,
        );
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed(), 2);
    }
}
