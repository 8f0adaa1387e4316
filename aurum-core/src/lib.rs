//! Aurum Core: historical equity data acquisition and local caching.
//!
//! - Ticker normalization and extraction from CSV lists
//! - Layered settings (defaults, TOML file)
//! - Data providers (Yahoo Finance chart API)
//! - Per-ticker parquet storage with a CSV mirror
//! - Batch download orchestration with retry and skip-if-cached
//! - Combining per-ticker files into one dataset
//! - Timestamped download run summaries

pub mod config;
pub mod data;
pub mod ticker;

pub use config::{ConfigError, Settings};
pub use ticker::{Ticker, TickerError, TickerValidator};
