//! `tracing` subscriber setup: console output in the configured format plus
//! an optional size-rotated plain-text log file.

use anyhow::{Context, Result};
use aurum_core::config::{LogFormat, LoggingConfig, Paths};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// What [`init_logging`] installed.
#[derive(Debug)]
pub struct LoggingHandle {
    /// Log file receiving a copy of every event, when file logging is on.
    pub log_file: Option<PathBuf>,
}

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
///
/// Fails if a subscriber is already installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig, paths: &Paths) -> Result<LoggingHandle> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let log_file = config
        .save_to_file
        .then(|| paths.logs_dir.join(&config.log_filename));
    let file_layer = match &log_file {
        Some(path) => Some(file_layer(path, config)?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(config.format))
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(LoggingHandle { log_file })
}

fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer().with_writer(io::stderr).with_target(false);
    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer<S>(path: &Path, config: &LoggingConfig) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = RotatingFile::open(path, config.max_bytes, config.backup_count)
        .with_context(|| format!("open log file {}", path.display()))?;

    Ok(fmt::layer().with_writer(file).with_ansi(false).boxed())
}

/// Append-only log file that rolls over by size.
///
/// When a record would push the file past `max_bytes`, `name` becomes
/// `name.1`, `name.1` becomes `name.2` and so on up to `backup_count`; the
/// oldest backup is dropped. With `backup_count == 0` the file is truncated
/// instead, and `max_bytes == 0` never rotates.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    active: Mutex<Active>,
}

struct Active {
    file: File,
    len: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backup_count: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backup_count,
            active: Mutex::new(Active { file, len }),
        })
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;

        let incoming = buf.len() as u64;
        if self.max_bytes > 0 && active.len > 0 && active.len + incoming > self.max_bytes {
            self.rotate(&mut active)?;
        }

        active.file.write_all(buf)?;
        active.len += incoming;
        Ok(buf.len())
    }

    fn rotate(&self, active: &mut Active) -> io::Result<()> {
        active.file.flush()?;

        if self.backup_count == 0 {
            active.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for n in (1..self.backup_count).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    replace(&from, &self.backup_path(n + 1))?;
                }
            }
            replace(&self.path, &self.backup_path(1))?;
            active.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
        }

        active.len = 0;
        Ok(())
    }
}

fn replace(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}

impl Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        active.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = &'a RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32) -> String {
        format!("record-{n:03}\n")
    }

    fn write_records(log: &RotatingFile, count: u32) {
        for n in 1..=count {
            (&*log).write_all(record(n).as_bytes()).unwrap();
        }
    }

    #[test]
    fn rotates_and_keeps_backup_count_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurum.log");
        // Each record is 11 bytes, so every second record overflows 20
        let log = RotatingFile::open(&path, 20, 2).unwrap();

        write_records(&log, 4);

        assert_eq!(fs::read_to_string(&path).unwrap(), record(4));
        assert_eq!(fs::read_to_string(dir.path().join("aurum.log.1")).unwrap(), record(3));
        assert_eq!(fs::read_to_string(dir.path().join("aurum.log.2")).unwrap(), record(2));
        assert!(!dir.path().join("aurum.log.3").exists());
    }

    #[test]
    fn existing_file_size_counts_toward_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurum.log");
        fs::write(&path, record(0)).unwrap();

        let log = RotatingFile::open(&path, 20, 1).unwrap();
        write_records(&log, 1);

        assert_eq!(fs::read_to_string(&path).unwrap(), record(1));
        assert_eq!(fs::read_to_string(dir.path().join("aurum.log.1")).unwrap(), record(0));
    }

    #[test]
    fn zero_backups_truncates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurum.log");
        let log = RotatingFile::open(&path, 20, 0).unwrap();

        write_records(&log, 3);

        assert_eq!(fs::read_to_string(&path).unwrap(), record(3));
        assert!(!dir.path().join("aurum.log.1").exists());
    }

    #[test]
    fn zero_max_bytes_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aurum.log");
        let log = RotatingFile::open(&path, 0, 3).unwrap();

        write_records(&log, 5);

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 5);
        assert!(!dir.path().join("aurum.log.1").exists());
    }
}
