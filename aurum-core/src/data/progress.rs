//! Progress callbacks for batch downloads.

use super::summary::DownloadOutcome;

/// Observer for multi-ticker download runs.
pub trait DownloadProgress: Send {
    /// Called when a batch starts. `batch` is zero-based.
    fn on_batch_start(&self, _batch: usize, _batches: usize, _size: usize) {}

    /// Called before a ticker is processed. `index` is the position in the whole run.
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// Called after a failed attempt that will be retried.
    fn on_retry(&self, _ticker: &str, _attempt: u32, _max_attempts: u32, _error: &str) {}

    /// Called once a ticker has its final outcome.
    fn on_complete(&self, outcome: &DownloadOutcome, index: usize, total: usize);

    /// Called when the whole run is done.
    fn on_run_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing` events.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_batch_start(&self, batch: usize, batches: usize, size: usize) {
        tracing::info!(batch = batch + 1, batches, size, "starting batch");
    }

    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        tracing::info!("[{}/{}] fetching {ticker}", index + 1, total);
    }

    fn on_retry(&self, ticker: &str, attempt: u32, max_attempts: u32, error: &str) {
        tracing::warn!(ticker, attempt, max_attempts, error, "attempt failed, retrying");
    }

    fn on_complete(&self, outcome: &DownloadOutcome, _index: usize, _total: usize) {
        if outcome.reason.is_empty() {
            tracing::info!(ticker = %outcome.ticker, status = %outcome.status, "done");
        } else {
            tracing::warn!(
                ticker = %outcome.ticker,
                status = %outcome.status,
                reason = %outcome.reason,
                "done"
            );
        }
    }

    fn on_run_complete(&self, succeeded: usize, skipped: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, skipped, failed, total, "download run complete");
    }
}

/// Discards all progress events.
pub struct NoProgress;

impl DownloadProgress for NoProgress {
    fn on_start(&self, _ticker: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _outcome: &DownloadOutcome, _index: usize, _total: usize) {}

    fn on_run_complete(&self, _succeeded: usize, _skipped: usize, _failed: usize, _total: usize) {}
}
