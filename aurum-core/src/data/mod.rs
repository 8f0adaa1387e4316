//! Data acquisition, per-ticker storage and combining

pub mod combine;
pub mod download;
pub mod progress;
pub mod provider;
pub mod store;
pub mod summary;
pub mod yahoo;

pub use combine::{combine, CombineOptions, Combined};
pub use download::{
    download_tickers, download_tickers_paced, AttemptError, CancelFlag, DownloadReport, Pacer,
    Pause, ThreadSleep,
};
pub use progress::{DownloadProgress, LogProgress, NoProgress};
pub use provider::{Bar, DataError, DataProvider, TimeSeries};
pub use store::{StoreError, WrittenPaths};
pub use summary::{DownloadOutcome, DownloadStatus};
pub use yahoo::YahooProvider;
