//! Aurum CLI: historical data download, combining and cache inspection.
//!
//! Commands:
//! - `download`: fetch daily bars from Yahoo Finance into the historical directory
//! - `combine`: merge per-ticker files into one dataset
//! - `summary`: show the most recent download run summary
//! - `normalize`: normalize ticker identifiers
//! - `status`: report which tickers are cached

mod logging;

use anyhow::{bail, Context, Result};
use aurum_core::config::Settings;
use aurum_core::data::{
    combine, download_tickers, store, summary, CombineOptions, DownloadStatus, LogProgress,
    YahooProvider,
};
use aurum_core::ticker::{extract_tickers, Ticker, TickerValidator};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "aurum",
    about = "Aurum: historical equity data downloader and cache"
)]
struct Cli {
    /// Settings file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `aurum_core=trace`. Overrides the settings file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars and cache each ticker as Parquet.
    Download {
        /// Tickers to download (e.g. PETR4 VALE3.SA).
        tickers: Vec<String>,

        /// CSV file with a ticker column (code, ticker, symbol, ...).
        #[arg(long)]
        tickers_file: Option<PathBuf>,

        /// First date to request (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Re-download tickers that are already cached.
        #[arg(long, default_value_t = false)]
        force: bool,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        max_attempts: Option<u32>,

        /// Skip the CSV mirror.
        #[arg(long, default_value_t = false)]
        no_csv: bool,
    },
    /// Merge cached per-ticker files into one dataset.
    Combine {
        /// Output name or path; relative names land in the data directory.
        #[arg(long, default_value = "all_histories")]
        output: PathBuf,

        /// Only these tickers (default: every cached file).
        #[arg(long, num_args = 1..)]
        tickers: Vec<String>,

        /// Do not add a `ticker` column.
        #[arg(long, default_value_t = false)]
        no_ticker_column: bool,

        /// Skip the CSV mirror.
        #[arg(long, default_value_t = false)]
        no_csv: bool,
    },
    /// Show the most recent download summary.
    Summary,
    /// Print the normalized form of each ticker.
    Normalize {
        #[arg(required = true)]
        tickers: Vec<String>,
    },
    /// Report cache status per ticker (default: every cached file).
    Status { tickers: Vec<String> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    settings.paths.initialize()?;
    let logging = logging::init_logging(&settings.logging, &settings.paths)?;
    if let Some(path) = &logging.log_file {
        tracing::debug!(path = %path.display(), "logging to file");
    }

    match cli.command {
        Commands::Download {
            tickers,
            tickers_file,
            start,
            force,
            batch_size,
            max_attempts,
            no_csv,
        } => {
            let dl = &mut settings.download;
            if let Some(start) = start {
                dl.default_start = start;
            }
            if let Some(n) = batch_size {
                dl.batch_size = n;
            }
            if let Some(n) = max_attempts {
                dl.max_attempts = n;
            }
            dl.force_redownload |= force;
            dl.save_csv &= !no_csv;
            run_download(&settings, &tickers, tickers_file.as_deref())
        }
        Commands::Combine {
            output,
            tickers,
            no_ticker_column,
            no_csv,
        } => run_combine(&settings, &output, &tickers, no_ticker_column, no_csv),
        Commands::Summary => run_summary(&settings),
        Commands::Normalize { tickers } => run_normalize(&settings, &tickers),
        Commands::Status { tickers } => run_status(&settings, &tickers),
    }
}

/// Normalize raw identifiers, warning about (and dropping) invalid ones.
fn normalize_all(settings: &Settings, raw: &[String]) -> Result<Vec<Ticker>> {
    let validator = TickerValidator::new(&settings.tickers)?;
    let mut tickers = Vec::with_capacity(raw.len());
    for r in raw {
        match validator.normalize(r) {
            Ok(t) => tickers.push(t),
            Err(e) => tracing::warn!(raw = %r, error = %e, "ignoring ticker"),
        }
    }
    Ok(tickers)
}

fn run_download(settings: &Settings, raw: &[String], tickers_file: Option<&Path>) -> Result<()> {
    let mut tickers = normalize_all(settings, raw)?;
    if let Some(path) = tickers_file {
        let extracted = extract_tickers(path, &settings.tickers)
            .with_context(|| format!("reading tickers from {}", path.display()))?;
        tracing::info!(count = extracted.len(), path = %path.display(), "loaded ticker list");
        tickers.extend(extracted);
    }

    let mut seen = HashSet::new();
    tickers.retain(|t| seen.insert(t.clone()));
    if tickers.is_empty() {
        bail!("no valid tickers given (pass TICKERS or --tickers-file)");
    }

    let provider = YahooProvider::new()?;
    let report = download_tickers(
        &provider,
        &settings.paths.historical_dir,
        &tickers,
        &settings.download,
        &LogProgress,
        None,
    );

    println!();
    println!("=== Download Summary ===");
    println!("Tickers:   {}", tickers.len());
    println!("OK:        {}", report.succeeded());
    println!("Cached:    {}", report.skipped());
    println!("Failed:    {}", report.failed());
    if let Some(path) = &report.summary_path {
        println!("Summary:   {}", path.display());
    }

    if !report.all_succeeded() {
        for outcome in report.failures() {
            eprintln!("Error for {}: {}", outcome.ticker, outcome.reason);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_combine(
    settings: &Settings,
    output: &Path,
    raw: &[String],
    no_ticker_column: bool,
    no_csv: bool,
) -> Result<()> {
    let dir = &settings.paths.historical_dir;
    let output_path = combine_output_path(settings, output);

    let tickers = if raw.is_empty() {
        None
    } else {
        Some(normalize_all(settings, raw)?)
    };
    let options = CombineOptions {
        tickers,
        add_ticker_column: !no_ticker_column,
        save_csv: settings.download.save_csv && !no_csv,
    };

    let combined = combine(dir, &output_path, &options)?;
    let (rows, cols) = combined.frame.shape();

    println!("Combined {} file(s): {rows} rows x {cols} columns", combined.included.len());
    for path in &combined.skipped {
        println!("Skipped (unreadable): {}", path.display());
    }
    println!("Parquet: {}", combined.parquet_path.display());
    if let Some(csv) = &combined.csv_path {
        println!("CSV:     {}", csv.display());
    }
    Ok(())
}

/// Relative outputs go under `data_dir`, outside the per-ticker directory, so
/// they are never mistaken for a cached ticker or merged back in.
fn combine_output_path(settings: &Settings, output: &Path) -> PathBuf {
    if output.is_absolute() {
        output.to_path_buf()
    } else {
        settings.paths.data_dir.join(output)
    }
}

fn run_summary(settings: &Settings) -> Result<()> {
    let dir = &settings.paths.historical_dir;
    let Some(outcomes) = summary::latest(dir)? else {
        println!("No download summaries in {}", dir.display());
        return Ok(());
    };

    let count = |s: DownloadStatus| outcomes.iter().filter(|o| o.status == s).count();
    println!(
        "Latest run: {} ticker(s), {} ok, {} cached, {} failed",
        outcomes.len(),
        count(DownloadStatus::Ok),
        count(DownloadStatus::SkippedCached),
        count(DownloadStatus::Failed),
    );
    println!();
    println!("{:<12} {:<15} Reason", "Ticker", "Status");
    println!("{}", "-".repeat(60));
    for o in &outcomes {
        println!("{:<12} {:<15} {}", o.ticker, o.status.to_string(), o.reason);
    }
    Ok(())
}

fn run_normalize(settings: &Settings, raw: &[String]) -> Result<()> {
    let validator = TickerValidator::new(&settings.tickers)?;
    for r in raw {
        match validator.normalize(r) {
            Ok(t) => println!("{r} -> {t}"),
            Err(e) => println!("{r} -> invalid ({e})"),
        }
    }
    Ok(())
}

fn run_status(settings: &Settings, raw: &[String]) -> Result<()> {
    let dir = &settings.paths.historical_dir;
    let tickers = if raw.is_empty() {
        cached_tickers(dir)?
    } else {
        normalize_all(settings, raw)?
    };

    if tickers.is_empty() {
        println!("Nothing cached in {}", dir.display());
        return Ok(());
    }

    println!("Directory: {}", dir.display());
    println!();
    println!("{:<12} {:<8} {:>8}  Date Range", "Ticker", "Status", "Rows");
    println!("{}", "-".repeat(56));
    for t in &tickers {
        match store::read(t, dir, &[store::DATE_COLUMN]) {
            Some(df) => {
                let range = store::dataframe_to_series(&df)
                    .ok()
                    .and_then(|s| Some(format!("{} to {}", s.first_date()?, s.last_date()?)))
                    .unwrap_or_else(|| "-".into());
                println!("{:<12} {:<8} {:>8}  {range}", t, "cached", df.height());
            }
            None if store::exists(t, dir) => println!("{:<12} {:<8}", t, "corrupt"),
            None => println!("{:<12} {:<8}", t, "missing"),
        }
    }
    Ok(())
}

/// Tickers with a parquet file in `dir`, sorted.
fn cached_tickers(dir: &Path) -> Result<Vec<Ticker>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut tickers = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(store::PARQUET_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(t) = Ticker::from_normalized(stem) {
                tickers.push(t);
            }
        }
    }
    tickers.sort();
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "aurum",
            "download",
            "petr4",
            "--start",
            "2020-01-02",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Download { tickers, start, .. } => {
                assert_eq!(tickers, vec!["petr4"]);
                assert_eq!(start, NaiveDate::from_ymd_opt(2020, 1, 2));
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn combined_output_stays_out_of_the_ticker_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths = settings.paths.rooted_at(dir.path());

        let out = combine_output_path(&settings, Path::new("all_histories"));
        assert_eq!(out, dir.path().join("data/all_histories"));
        assert_ne!(out.parent(), Some(settings.paths.historical_dir.as_path()));

        let absolute = dir.path().join("elsewhere/merged");
        assert_eq!(combine_output_path(&settings, &absolute), absolute);

        let ticker = Ticker::from_normalized("PETR4.SA").unwrap();
        let series = aurum_core::data::TimeSeries::new(vec![aurum_core::data::Bar {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adj_close: 1.0,
            volume: 1,
        }]);
        store::write(&series, &ticker, &settings.paths.historical_dir, false).unwrap();
        combine(
            &settings.paths.historical_dir,
            &out,
            &CombineOptions::default(),
        )
        .unwrap();

        let cached = cached_tickers(&settings.paths.historical_dir).unwrap();
        assert_eq!(cached, vec![ticker]);
    }

    #[test]
    fn cached_tickers_lists_parquet_stems_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VALE3.SA.parquet"), b"").unwrap();
        std::fs::write(dir.path().join("PETR4.SA.parquet"), b"").unwrap();
        std::fs::write(dir.path().join("PETR4.SA.csv"), b"").unwrap();
        std::fs::write(dir.path().join("download_summary_20240101T000000Z.csv"), b"").unwrap();

        let names: Vec<String> = cached_tickers(dir.path())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["PETR4.SA", "VALE3.SA"]);
    }
}
