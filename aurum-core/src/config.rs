//! Settings: paths, download pacing, ticker rules and logging.
//!
//! Every section has literal defaults, so an empty TOML file (or no file at
//! all) yields a working configuration. Loading never touches the
//! filesystem beyond reading the file itself; directories are created by an
//! explicit [`Paths::initialize`] call from the entry point.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: Paths,
    pub download: DownloadConfig,
    pub tickers: TickerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path` when given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

/// Directory layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub data_dir: PathBuf,
    /// Per-ticker parquet/csv files, download summaries and combined outputs.
    pub historical_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            historical_dir: PathBuf::from("data/historical"),
            cache_dir: PathBuf::from("data/.cache"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl Paths {
    /// Re-root every relative path under `base`.
    pub fn rooted_at(&self, base: &Path) -> Self {
        let root = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        Self {
            data_dir: root(&self.data_dir),
            historical_dir: root(&self.historical_dir),
            cache_dir: root(&self.cache_dir),
            logs_dir: root(&self.logs_dir),
        }
    }

    /// Create every configured directory.
    pub fn initialize(&self) -> Result<(), ConfigError> {
        for dir in [
            &self.data_dir,
            &self.historical_dir,
            &self.cache_dir,
            &self.logs_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Parameters for the batch download orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub default_start: NaiveDate,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub sleep_between_batches_secs: f64,
    pub sleep_between_tickers_secs: f64,
    /// Also write the `.csv` mirror next to each parquet file.
    pub save_csv: bool,
    pub force_redownload: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_start: NaiveDate::from_ymd_opt(2011, 1, 1).unwrap_or_default(),
            batch_size: 15,
            max_attempts: 4,
            sleep_between_batches_secs: 1.0,
            sleep_between_tickers_secs: 0.2,
            save_csv: true,
            force_redownload: false,
        }
    }
}

impl DownloadConfig {
    pub fn batch_delay(&self) -> Duration {
        secs_to_duration(self.sleep_between_batches_secs)
    }

    /// Pause between tickers, also used as the fixed backoff between attempts.
    pub fn ticker_delay(&self) -> Duration {
        secs_to_duration(self.sleep_between_tickers_secs)
    }

    /// A configuration with no pauses, for tests and offline replays.
    pub fn without_delays(mut self) -> Self {
        self.sleep_between_batches_secs = 0.0;
        self.sleep_between_tickers_secs = 0.0;
        self
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Ticker normalization rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    pub default_suffix: String,
    /// Regex the base symbol (without suffix) must match.
    pub pattern: String,
    /// Lowercase header names that identify the ticker column of a CSV list.
    pub header_keywords: BTreeSet<String>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            default_suffix: ".SA".into(),
            pattern: r"^[A-Z]{2,6}\d{1,2}$".into(),
            header_keywords: [
                "code", "stock", "ativo", "código", "codigo", "symbol", "ticker",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `aurum_core=debug`. `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    pub save_to_file: bool,
    /// File name inside `paths.logs_dir`.
    pub log_filename: String,
    /// Rotate the log file once it would grow past this size; 0 disables rotation.
    pub max_bytes: u64,
    /// Rotated files kept as `<log_filename>.1` (newest) .. `<log_filename>.N`.
    pub backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            save_to_file: true,
            log_filename: "aurum.log".into(),
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(
            s.download.default_start,
            NaiveDate::from_ymd_opt(2011, 1, 1).unwrap()
        );
        assert_eq!(s.download.batch_size, 15);
        assert_eq!(s.download.max_attempts, 4);
        assert_eq!(s.download.batch_delay(), Duration::from_secs(1));
        assert_eq!(s.download.ticker_delay(), Duration::from_millis(200));
        assert!(s.download.save_csv);
        assert!(!s.download.force_redownload);
        assert_eq!(s.tickers.default_suffix, ".SA");
        assert!(s.tickers.header_keywords.contains("ticker"));
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.logging.max_bytes, 10 * 1024 * 1024);
        assert_eq!(s.logging.backup_count, 5);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let s = Settings::from_toml(
            r#"
[download]
batch_size = 5
default_start = "2020-01-02"

[logging]
format = "json"
backup_count = 2
"#,
        )
        .unwrap();

        assert_eq!(s.download.batch_size, 5);
        assert_eq!(s.download.max_attempts, 4);
        assert_eq!(
            s.download.default_start,
            NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()
        );
        assert_eq!(s.logging.format, LogFormat::Json);
        assert_eq!(s.logging.backup_count, 2);
        assert_eq!(s.logging.max_bytes, LoggingConfig::default().max_bytes);
        assert_eq!(s.paths, Paths::default());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            Settings::from_toml("[download\nbatch_size = "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn negative_or_nan_delays_are_zero() {
        let cfg = DownloadConfig {
            sleep_between_batches_secs: -1.0,
            sleep_between_tickers_secs: f64::NAN,
            ..DownloadConfig::default()
        };
        assert_eq!(cfg.batch_delay(), Duration::ZERO);
        assert_eq!(cfg.ticker_delay(), Duration::ZERO);
    }

    #[test]
    fn oversized_delays_saturate() {
        let cfg = DownloadConfig {
            sleep_between_batches_secs: f64::INFINITY,
            sleep_between_tickers_secs: 1e30,
            ..DownloadConfig::default()
        };
        assert_eq!(cfg.batch_delay(), Duration::MAX);
        assert_eq!(cfg.ticker_delay(), Duration::MAX);

        let parsed = Settings::from_toml("[download]\nsleep_between_tickers_secs = 1e30\n").unwrap();
        assert_eq!(parsed.download.ticker_delay(), Duration::MAX);
    }

    #[test]
    fn initialize_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::default().rooted_at(tmp.path());
        assert!(!paths.historical_dir.exists());

        paths.initialize().unwrap();

        assert!(paths.historical_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.logs_dir.is_dir());
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
