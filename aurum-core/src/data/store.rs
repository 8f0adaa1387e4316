//! Per-ticker Parquet storage with an optional CSV mirror.
//!
//! Layout: `{dir}/{TICKER}.parquet` (snappy) and `{dir}/{TICKER}.csv`.
//!
//! - Writes are whole-file and atomic (write to .tmp, rename into place)
//! - The CSV mirror is best effort: failures are logged, never returned
//! - Reads never fail loudly: missing and corrupt files both come back as `None`

use super::provider::{Bar, TimeSeries};
use crate::ticker::Ticker;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PARQUET_EXT: &str = "parquet";
pub const CSV_EXT: &str = "csv";
pub const DATE_COLUMN: &str = "date";

/// Column order of a persisted [`TimeSeries`].
pub const BAR_COLUMNS: [&str; 7] = [
    DATE_COLUMN,
    "open",
    "high",
    "low",
    "close",
    "adj_close",
    "volume",
];

/// Errors from storage, combining and summary persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refusing to write an empty dataset for '{ticker}'")]
    EmptyDataset { ticker: String },

    #[error("no parquet files to combine in {dir}")]
    NoInputFiles { dir: String },

    #[error("none of the {candidates} parquet files in {dir} could be read")]
    NoValidData { dir: String, candidates: usize },

    #[error("schema mismatch in {path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error on {path}: {source}")]
    Parquet {
        path: String,
        #[source]
        source: PolarsError,
    },

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn parquet(path: &Path, source: PolarsError) -> Self {
        Self::Parquet {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Paths produced by a write. `csv` is `None` when the mirror was disabled or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPaths {
    pub parquet: PathBuf,
    pub csv: Option<PathBuf>,
}

/// `{dir}/{TICKER}.parquet`
pub fn parquet_path(ticker: &Ticker, dir: &Path) -> PathBuf {
    dir.join(format!("{ticker}.{PARQUET_EXT}"))
}

/// `{dir}/{TICKER}.csv`
pub fn csv_path(ticker: &Ticker, dir: &Path) -> PathBuf {
    dir.join(format!("{ticker}.{CSV_EXT}"))
}

/// Whether the primary artifact for `ticker` exists. The CSV mirror is ignored.
pub fn exists(ticker: &Ticker, dir: &Path) -> bool {
    parquet_path(ticker, dir).is_file()
}

/// Persist one ticker's series as parquet, plus the CSV mirror when `save_csv`.
pub fn write(
    series: &TimeSeries,
    ticker: &Ticker,
    dir: &Path,
    save_csv: bool,
) -> Result<WrittenPaths, StoreError> {
    if series.is_empty() {
        return Err(StoreError::EmptyDataset {
            ticker: ticker.to_string(),
        });
    }

    let mut df = series_to_dataframe(series)?;
    let written = write_frame(&mut df, &parquet_path(ticker, dir), save_csv)?;
    tracing::info!(
        %ticker,
        rows = series.len(),
        path = %written.parquet.display(),
        "saved time series"
    );
    Ok(written)
}

/// Write any frame to `parquet_path`, and to the same path with a `.csv`
/// extension when `save_csv`. Creates the parent directory.
///
/// Only the parquet write decides success; a CSV failure is logged and
/// reported as `csv: None`.
pub fn write_frame(
    df: &mut DataFrame,
    parquet_path: &Path,
    save_csv: bool,
) -> Result<WrittenPaths, StoreError> {
    if let Some(parent) = parquet_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp_path = parquet_path.with_extension("parquet.tmp");
    let committed = write_parquet(df, &tmp_path).and_then(|()| {
        fs::rename(&tmp_path, parquet_path).map_err(|e| StoreError::io(parquet_path, e))
    });
    if let Err(e) = committed {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    let csv = if save_csv {
        let path = parquet_path.with_extension(CSV_EXT);
        match write_csv_mirror(df, &path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "saved csv mirror");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "csv mirror write failed");
                None
            }
        }
    } else {
        None
    };

    Ok(WrittenPaths {
        parquet: parquet_path.to_path_buf(),
        csv,
    })
}

/// Load a ticker's parquet file, coercing `date_columns` to calendar dates.
///
/// Returns `None` when the file is missing or unreadable.
pub fn read(ticker: &Ticker, dir: &Path, date_columns: &[&str]) -> Option<DataFrame> {
    let path = parquet_path(ticker, dir);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "parquet not found");
        return None;
    }

    let loaded = read_parquet(&path).and_then(|mut df| {
        for name in date_columns {
            normalize_date_column(&mut df, name)?;
        }
        Ok(df)
    });

    match loaded {
        Ok(df) => {
            tracing::debug!(rows = df.height(), path = %path.display(), "loaded parquet");
            Some(df)
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to load parquet");
            None
        }
    }
}

/// Typed read: like [`read`] but also validates the bar schema.
pub fn read_series(ticker: &Ticker, dir: &Path) -> Option<TimeSeries> {
    let df = read(ticker, dir, &[DATE_COLUMN])?;
    match dataframe_to_series(&df) {
        Ok(series) => Some(series),
        Err(e) => {
            tracing::error!(%ticker, error = %e, "cached file does not hold a time series");
            None
        }
    }
}

// ── Parquet / CSV I/O helpers ───────────────────────────────────────

pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::parquet(path, e))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Snappy)
        .finish(df)
        .map_err(|e| StoreError::parquet(path, e))?;
    Ok(())
}

fn write_csv_mirror(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_date_format(Some("%Y-%m-%d".into()))
        .finish(df)?;
    Ok(())
}

// ── Date coercion ───────────────────────────────────────────────────

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

/// Parse one textual date leniently. `None` for anything unrecognized.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Coerce column `name` (when present) to the `Date` dtype.
///
/// Datetimes are truncated to their calendar day, strings are parsed
/// leniently, integers are read as days since the Unix epoch. Values that
/// cannot be converted become null.
pub fn normalize_date_column(df: &mut DataFrame, name: &str) -> Result<(), StoreError> {
    let Ok(column) = df.column(name) else {
        return Ok(());
    };
    let series = column.as_materialized_series();

    let normalized = match series.dtype() {
        DataType::Date => return Ok(()),
        DataType::Datetime(_, _) => series.cast(&DataType::Date)?,
        DataType::String => {
            let days: Vec<Option<i32>> = series
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_date).map(days_since_epoch))
                .collect();
            Series::new(name.into(), days).cast(&DataType::Date)?
        }
        dt if dt.is_integer() => series.cast(&DataType::Int32)?.cast(&DataType::Date)?,
        _ => Series::full_null(name.into(), series.len(), &DataType::Date),
    };

    df.with_column(normalized)?;
    Ok(())
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

// ── TimeSeries ⇄ DataFrame ──────────────────────────────────────────

/// Convert a typed series to a frame with the columns in [`BAR_COLUMNS`] order.
pub fn series_to_dataframe(series: &TimeSeries) -> Result<DataFrame, StoreError> {
    let bars = &series.bars;
    let dates: Vec<i32> = bars.iter().map(|b| days_since_epoch(b.date)).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let adj_closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    let df = DataFrame::new(vec![
        Column::new(DATE_COLUMN.into(), dates).cast(&DataType::Date)?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])?;
    Ok(df)
}

/// Convert a frame back to a typed series. Fails on missing columns or
/// mismatched dtypes, and on null dates.
pub fn dataframe_to_series(df: &DataFrame) -> Result<TimeSeries, StoreError> {
    let schema_err = |reason: String| StoreError::Schema {
        path: "<frame>".into(),
        reason,
    };
    for name in BAR_COLUMNS {
        if df.column(name).is_err() {
            return Err(schema_err(format!("missing column '{name}'")));
        }
    }

    let f64_col = |name: &str| -> Result<Vec<f64>, StoreError> {
        let s = df.column(name)?.as_materialized_series().cast(&DataType::Float64)?;
        Ok(s.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    };

    let dates = df.column(DATE_COLUMN)?.as_materialized_series();
    let date_ca = dates
        .date()
        .map_err(|e| schema_err(format!("date column type: {e}")))?;
    let volumes = df
        .column("volume")?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;
    let volume_ca = volumes.u64()?;

    let opens = f64_col("open")?;
    let highs = f64_col("high")?;
    let lows = f64_col("low")?;
    let closes = f64_col("close")?;
    let adj_closes = f64_col("adj_close")?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| schema_err(format!("null date at row {i}")))?;
        bars.push(Bar {
            date: epoch() + chrono::Duration::days(i64::from(days)),
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            adj_close: adj_closes[i],
            volume: volume_ca.get(i).unwrap_or(0),
        });
    }

    Ok(TimeSeries::new(bars))
}
