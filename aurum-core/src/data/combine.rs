//! Combine per-ticker parquet files into one dataset.
//!
//! Best effort: unreadable files are logged and left out. Only an empty
//! candidate set or a set where nothing loads is an error.

use super::store::{self, StoreError, CSV_EXT, DATE_COLUMN, PARQUET_EXT};
use crate::ticker::Ticker;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

pub const TICKER_COLUMN: &str = "ticker";

/// Options for [`combine`].
#[derive(Debug, Clone)]
pub struct CombineOptions {
    /// Restrict to these tickers; `None` means every parquet file in the directory.
    pub tickers: Option<Vec<Ticker>>,
    /// Insert a leading `ticker` column (from the file stem) when a file lacks one.
    pub add_ticker_column: bool,
    /// Also write the CSV mirror of the combined output.
    pub save_csv: bool,
}

impl Default for CombineOptions {
    fn default() -> Self {
        Self {
            tickers: None,
            add_ticker_column: true,
            save_csv: true,
        }
    }
}

/// Result of a successful combine.
#[derive(Debug)]
pub struct Combined {
    pub frame: DataFrame,
    pub parquet_path: PathBuf,
    pub csv_path: Option<PathBuf>,
    /// Files that were read into `frame`, in row order.
    pub included: Vec<PathBuf>,
    /// Files left out because they could not be read, or because a column
    /// type conflicts with the files merged before them.
    pub skipped: Vec<PathBuf>,
}

/// Merge the per-ticker files in `dir` and persist the result at
/// `output_path`, plus a `.csv` mirror when asked. See [`output_parquet_path`]
/// for how the extension is chosen.
///
/// Rows keep file discovery order (sorted by file name, or the order of
/// `options.tickers`), then each file's own order. Columns are the union of
/// all files; cells a file does not have are null. When a column's types
/// cannot be unified, earlier files win and the conflicting file is skipped.
pub fn combine(
    dir: &Path,
    output_path: &Path,
    options: &CombineOptions,
) -> Result<Combined, StoreError> {
    let output_path = output_parquet_path(output_path);
    let candidates = discover(dir, &output_path, options.tickers.as_deref())?;

    if candidates.is_empty() {
        return Err(StoreError::NoInputFiles {
            dir: dir.display().to_string(),
        });
    }
    tracing::info!(files = candidates.len(), dir = %dir.display(), "combining parquet files");

    let mut pieces = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for path in candidates.iter() {
        match load_piece(path, options.add_ticker_column) {
            Ok(df) => pieces.push((path.clone(), df)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                skipped.push(path.clone());
            }
        }
    }

    if pieces.is_empty() {
        return Err(StoreError::NoValidData {
            dir: dir.display().to_string(),
            candidates: candidates.len(),
        });
    }

    let all = pieces.iter().map(|(_, df)| df.clone()).collect();
    let (mut frame, included): (DataFrame, Vec<PathBuf>) = match concat_frames(all) {
        Ok(frame) => (frame, pieces.into_iter().map(|(p, _)| p).collect()),
        Err(e) => {
            tracing::warn!(error = %e, "schemas conflict, merging file by file");
            merge_one_by_one(dir, pieces, &mut skipped)?
        }
    };

    let written = store::write_frame(&mut frame, &output_path, options.save_csv)?;
    tracing::info!(
        rows = frame.height(),
        files = included.len(),
        skipped = skipped.len(),
        path = %written.parquet.display(),
        "combined dataset saved"
    );

    Ok(Combined {
        frame,
        parquet_path: written.parquet,
        csv_path: written.csv,
        included,
        skipped,
    })
}

/// Where the combined parquet file goes: a `.csv` or `.parquet` extension is
/// replaced, anything else (including dotted names like `combined.v2`) gets
/// `.parquet` appended.
pub fn output_parquet_path(path: &Path) -> PathBuf {
    let ext = path.extension().and_then(|e| e.to_str());
    match ext {
        Some(e) if e.eq_ignore_ascii_case(PARQUET_EXT) || e.eq_ignore_ascii_case(CSV_EXT) => {
            path.with_extension(PARQUET_EXT)
        }
        Some(_) => {
            let mut name = path.as_os_str().to_owned();
            name.push(format!(".{PARQUET_EXT}"));
            PathBuf::from(name)
        }
        None => path.with_extension(PARQUET_EXT),
    }
}

fn concat_frames(frames: Vec<DataFrame>) -> PolarsResult<DataFrame> {
    let args = UnionArgs {
        to_supertypes: true,
        ..Default::default()
    };
    let lazy = frames.into_iter().map(IntoLazy::lazy).collect::<Vec<_>>();
    concat_lf_diagonal(lazy, args)?.collect()
}

/// Slow path: add pieces in order, skipping any that cannot be unified with
/// what is already merged.
fn merge_one_by_one(
    dir: &Path,
    pieces: Vec<(PathBuf, DataFrame)>,
    skipped: &mut Vec<PathBuf>,
) -> Result<(DataFrame, Vec<PathBuf>), StoreError> {
    let candidates = pieces.len() + skipped.len();
    let mut merged: Option<DataFrame> = None;
    let mut included = Vec::with_capacity(pieces.len());

    for (path, df) in pieces {
        let next = match &merged {
            None => Ok(df),
            Some(acc) => concat_frames(vec![acc.clone(), df]),
        };
        match next {
            Ok(frame) => {
                merged = Some(frame);
                included.push(path);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping file with conflicting schema"
                );
                skipped.push(path);
            }
        }
    }

    let frame = merged.ok_or_else(|| StoreError::NoValidData {
        dir: dir.display().to_string(),
        candidates,
    })?;
    Ok((frame, included))
}

/// Candidate files: the requested tickers that exist, or every parquet file
/// in `dir` except `output_path`.
fn discover(
    dir: &Path,
    output_path: &Path,
    tickers: Option<&[Ticker]>,
) -> Result<Vec<PathBuf>, StoreError> {
    if let Some(tickers) = tickers {
        let files = tickers
            .iter()
            .filter(|t| store::exists(t, dir))
            .map(|t| store::parquet_path(t, dir))
            .collect();
        return Ok(files);
    }

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let output = canonical(output_path);
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        let is_parquet = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(PARQUET_EXT);
        if is_parquet && canonical(&path) != output {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read one file, tag it with its ticker and normalize its date column.
fn load_piece(path: &Path, add_ticker_column: bool) -> Result<DataFrame, StoreError> {
    let mut df = store::read_parquet(path)?;

    if add_ticker_column && df.column(TICKER_COLUMN).is_err() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tags = Column::new(TICKER_COLUMN.into(), vec![stem; df.height()]);
        df.insert_column(0, tags)?;
    }

    store::normalize_date_column(&mut df, DATE_COLUMN)?;
    Ok(df)
}
