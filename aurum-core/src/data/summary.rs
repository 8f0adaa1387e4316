//! Download run summaries: one timestamped CSV per orchestrator run.
//!
//! Files are named `download_summary_<YYYYMMDDTHHMMSSZ>.csv` (UTC), so the
//! lexicographically greatest name is the most recent run.

use super::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUMMARY_PREFIX: &str = "download_summary_";
const SUMMARY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Final state of one ticker in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Ok,
    SkippedCached,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::SkippedCached => "SKIPPED_CACHED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One row of a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub ticker: String,
    pub status: DownloadStatus,
    /// Last error description for `FAILED`; empty otherwise.
    #[serde(default)]
    pub reason: String,
}

impl DownloadOutcome {
    pub fn ok(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            status: DownloadStatus::Ok,
            reason: String::new(),
        }
    }

    pub fn skipped(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            status: DownloadStatus::SkippedCached,
            reason: String::new(),
        }
    }

    pub fn failed(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            status: DownloadStatus::Failed,
            reason: reason.into(),
        }
    }
}

/// Default summary file name for a run at `at`.
pub fn summary_filename(at: DateTime<Utc>) -> String {
    format!("{SUMMARY_PREFIX}{}.csv", at.format(SUMMARY_TIMESTAMP_FORMAT))
}

/// Write `outcomes` as CSV (`ticker,status,reason`) into `dir`.
///
/// Without a `filename`, a UTC-timestamped name is generated; if a summary
/// from the same second already exists, a zero-padded `_0001`, `_0002`, ...
/// is appended so later files keep sorting after earlier ones.
pub fn record(
    outcomes: &[DownloadOutcome],
    dir: &Path,
    filename: Option<&str>,
) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let path = match filename {
        Some(name) => dir.join(name),
        None => unique_path(dir, &summary_filename(Utc::now())),
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)?;
    writer.write_record(["ticker", "status", "reason"])?;
    for outcome in outcomes {
        writer.serialize(outcome)?;
    }
    writer.flush().map_err(|e| StoreError::io(&path, e))?;

    tracing::info!(path = %path.display(), rows = outcomes.len(), "summary saved");
    Ok(path)
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.trim_end_matches(".csv");
    (1..)
        .map(|n: u32| dir.join(format!("{stem}_{n:04}.csv")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// All summary files in `dir`, newest first.
pub fn list(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        let is_summary = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SUMMARY_PREFIX) && n.ends_with(".csv"));
        if is_summary {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(paths)
}

/// Parse one summary file.
pub fn load(path: &Path) -> Result<Vec<DownloadOutcome>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let outcomes = reader
        .deserialize()
        .collect::<Result<Vec<DownloadOutcome>, _>>()?;
    Ok(outcomes)
}

/// The newest summary in `dir`, or `None` when there is none.
pub fn latest(dir: &Path) -> Result<Option<Vec<DownloadOutcome>>, StoreError> {
    match list(dir)?.first() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading latest summary");
            load(path).map(Some)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcomes() -> Vec<DownloadOutcome> {
        vec![
            DownloadOutcome::ok("PETR4.SA"),
            DownloadOutcome::skipped("VALE3.SA"),
            DownloadOutcome::failed("XXXX3.SA", "ticker not found: XXXX3.SA, delisted"),
        ]
    }

    #[test]
    fn filename_embeds_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(summary_filename(at), "download_summary_20240506T070809Z.csv");
    }

    #[test]
    fn record_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = record(&outcomes(), dir.path(), None).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(SUMMARY_PREFIX));
        assert!(name.ends_with("Z.csv"));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("ticker,status,reason\n"));
        assert!(text.contains("SKIPPED_CACHED"));

        assert_eq!(load(&path).unwrap(), outcomes());
    }

    #[test]
    fn same_second_runs_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let name = summary_filename(Utc::now());
        fs::write(dir.path().join(&name), "ticker,status,reason\n").unwrap();

        let path = unique_path(dir.path(), &name);
        assert_ne!(path, dir.path().join(&name));
        assert!(path.file_name() > Some(std::ffi::OsStr::new(&name)));
    }

    #[test]
    fn latest_stays_newest_past_ten_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let name = summary_filename(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let mut last = None;
        for i in 0..12 {
            let path = unique_path(dir.path(), &name);
            let row = DownloadOutcome::ok(format!("RUN{i}.SA"));
            record(&[row], dir.path(), path.file_name().and_then(|n| n.to_str())).unwrap();
            last = Some(path);
        }

        let listed = list(dir.path()).unwrap();
        assert_eq!(listed.len(), 12);
        assert_eq!(listed.first(), last.as_ref());
        assert_eq!(
            latest(dir.path()).unwrap(),
            Some(vec![DownloadOutcome::ok("RUN11.SA")])
        );
    }

    #[test]
    fn explicit_filename_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = record(&outcomes(), dir.path(), Some("manual.csv")).unwrap();
        assert_eq!(path, dir.path().join("manual.csv"));
    }

    #[test]
    fn latest_on_missing_or_empty_dir_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest(dir.path()).unwrap().is_none());
        assert!(latest(&dir.path().join("nope")).unwrap().is_none());
    }
}
