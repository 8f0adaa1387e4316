//! Ticker identifiers: normalization, validation and extraction from CSV lists.
//!
//! A normalized ticker is an uppercase base symbol (e.g. `PETR4`) followed by
//! the exchange suffix (e.g. `.SA`). The ticker string is also the file stem of
//! its per-entity artifacts, so it must never contain path separators.

use crate::config::TickerConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickerError {
    #[error("empty ticker")]
    Empty,

    #[error("ticker '{raw}' does not match pattern {pattern}")]
    InvalidFormat { raw: String, pattern: String },

    #[error("invalid ticker pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no ticker column in {path} (looked for headers: {keywords})")]
    NoTickerColumn { path: String, keywords: String },

    #[error("read ticker list {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

/// An exchange-qualified ticker such as `VALE3.SA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Normalize and validate a raw ticker using the given configuration.
    ///
    /// Accepts `petr4`, ` PETR4 `, `PETR4.SA` and `petr4.sa` alike; all become `PETR4.SA`.
    pub fn parse(raw: &str, config: &TickerConfig) -> Result<Self, TickerError> {
        let validator = TickerValidator::new(config)?;
        validator.normalize(raw)
    }

    /// Wrap an identifier that is already normalized (e.g. a file stem read back
    /// from the cache directory). Only rejects empty strings and path separators.
    pub fn from_normalized(s: &str) -> Result<Self, TickerError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TickerError::Empty);
        }
        if s.contains(['/', '\\']) {
            return Err(TickerError::InvalidFormat {
                raw: s.to_string(),
                pattern: "no path separators".into(),
            });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The symbol without its exchange suffix (`PETR4.SA` → `PETR4`).
    pub fn base(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(base, _)| base)
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compiled form of a [`TickerConfig`], for normalizing many tickers without
/// recompiling the pattern each time.
#[derive(Debug, Clone)]
pub struct TickerValidator {
    pattern: Regex,
    suffix: String,
}

impl TickerValidator {
    pub fn new(config: &TickerConfig) -> Result<Self, TickerError> {
        let pattern = Regex::new(&config.pattern).map_err(|e| TickerError::InvalidPattern {
            pattern: config.pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            suffix: config.default_suffix.to_uppercase(),
        })
    }

    pub fn normalize(&self, raw: &str) -> Result<Ticker, TickerError> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            return Err(TickerError::Empty);
        }

        let base = upper.split_once('.').map_or(upper.as_str(), |(b, _)| b);
        if !self.pattern.is_match(base) {
            return Err(TickerError::InvalidFormat {
                raw: raw.trim().to_string(),
                pattern: self.pattern.as_str().to_string(),
            });
        }

        Ok(Ticker(format!("{base}{}", self.suffix)))
    }
}

/// Read a ticker list from a CSV file.
///
/// The ticker column is the first one whose header matches one of the
/// configured keywords (case-insensitive). Invalid cells are skipped and
/// duplicates dropped, keeping first-seen order.
pub fn extract_tickers(path: &Path, config: &TickerConfig) -> Result<Vec<Ticker>, TickerError> {
    let read_err = |e: csv::Error| TickerError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let validator = TickerValidator::new(config)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_err)?;

    let headers = reader.headers().map_err(read_err)?.clone();
    let column = headers
        .iter()
        .position(|h| config.header_keywords.contains(&h.to_lowercase()))
        .ok_or_else(|| {
            let keywords: Vec<&str> =
                config.header_keywords.iter().map(String::as_str).collect();
            TickerError::NoTickerColumn {
                path: path.display().to_string(),
                keywords: keywords.join(", "),
            }
        })?;

    let mut seen = HashSet::new();
    let mut tickers = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_err)?;
        let Some(cell) = record.get(column) else {
            continue;
        };
        match validator.normalize(cell) {
            Ok(ticker) => {
                if seen.insert(ticker.clone()) {
                    tickers.push(ticker);
                }
            }
            Err(e) => tracing::debug!(cell, error = %e, "skipping ticker cell"),
        }
    }

    Ok(tickers)
}
