//! Logging setup for nutriparse binaries.
//!
//! Log files are date-stamped (`nutriparse-2025-06-01.log`): the writer
//! switches files when the UTC day changes and prunes files past the
//! retention window, so disk usage is bounded without any rename chain.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "nutriparse=info,nutriparse_server=info,nutriparse_worker=info,nutriparse_store=info";
const RETENTION_DAYS: usize = 30;

/// Logging configuration shared by the API and worker binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing: daily files under the nutriparse home plus stderr.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let files = DailyLogFiles::new(log_dir, config.app_name, RETENTION_DAYS);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter
            .to_string()
            .parse()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(files)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The nutriparse home directory: ~/.nutriparse (overridable).
pub fn nutriparse_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("NUTRIPARSE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nutriparse")
}

/// The logs directory: ~/.nutriparse/logs
pub fn logs_dir() -> PathBuf {
    nutriparse_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct OpenDay {
    day: String,
    file: File,
}

struct Shared {
    dir: PathBuf,
    prefix: String,
    keep_days: usize,
    open: Mutex<Option<OpenDay>>,
}

/// Date-keyed log writer. Cheap to clone; all clones share one open file.
#[derive(Clone)]
pub struct DailyLogFiles {
    shared: Arc<Shared>,
}

impl DailyLogFiles {
    pub fn new(dir: PathBuf, app_name: &str, keep_days: usize) -> Self {
        let prefix: String = app_name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            shared: Arc::new(Shared {
                dir,
                prefix,
                keep_days: keep_days.max(1),
                open: Mutex::new(None),
            }),
        }
    }

    fn file_name(&self, day: &str) -> String {
        format!("{}-{}.log", self.shared.prefix, day)
    }

    fn write_dated(&self, day: &str, buf: &[u8]) -> io::Result<usize> {
        let mut open = self
            .shared
            .open
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;

        let stale = open.as_ref().map(|o| o.day != day).unwrap_or(true);
        if stale {
            fs::create_dir_all(&self.shared.dir)?;
            let path = self.shared.dir.join(self.file_name(day));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            *open = Some(OpenDay {
                day: day.to_string(),
                file,
            });
            // Entering a new day is the natural moment to drop old files.
            self.prune()?;
        }

        match open.as_mut() {
            Some(current) => current.file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "log file unavailable")),
        }
    }

    /// Remove dated files beyond the retention window. File names embed
    /// the date, so lexical order is age order.
    fn prune(&self) -> io::Result<()> {
        let marker = format!("{}-", self.shared.prefix);
        let mut dated: Vec<String> = fs::read_dir(&self.shared.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(&marker) && name.ends_with(".log"))
            .collect();
        if dated.len() <= self.shared.keep_days {
            return Ok(());
        }
        dated.sort_unstable();
        let excess = dated.len() - self.shared.keep_days;
        for name in dated.into_iter().take(excess) {
            let _ = fs::remove_file(self.shared.dir.join(name));
        }
        Ok(())
    }
}

impl io::Write for DailyLogFiles {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.write_dated(&day, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut open = self
            .shared
            .open
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        if let Some(current) = open.as_mut() {
            current.file.flush()?;
        }
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for DailyLogFiles {
    type Writer = DailyLogFiles;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_file_when_the_day_changes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = DailyLogFiles::new(dir.path().to_path_buf(), "api", 30);

        writer.write_dated("2025-06-01", b"first day\n").expect("write");
        writer.write_dated("2025-06-01", b"still first\n").expect("write");
        writer.write_dated("2025-06-02", b"second day\n").expect("write");

        let day_one =
            fs::read_to_string(dir.path().join("api-2025-06-01.log")).expect("day one exists");
        assert!(day_one.contains("first day") && day_one.contains("still first"));
        let day_two =
            fs::read_to_string(dir.path().join("api-2025-06-02.log")).expect("day two exists");
        assert_eq!(day_two, "second day\n");
    }

    #[test]
    fn prunes_past_the_retention_window() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = DailyLogFiles::new(dir.path().to_path_buf(), "api", 2);

        for day in ["2025-06-01", "2025-06-02", "2025-06-03", "2025-06-04"] {
            writer.write_dated(day, b"line\n").expect("write");
        }

        assert!(!dir.path().join("api-2025-06-01.log").exists());
        assert!(!dir.path().join("api-2025-06-02.log").exists());
        assert!(dir.path().join("api-2025-06-03.log").exists());
        assert!(dir.path().join("api-2025-06-04.log").exists());
    }

    #[test]
    fn app_name_specials_are_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = DailyLogFiles::new(dir.path().to_path_buf(), "api server/1", 30);
        writer.write_dated("2025-06-01", b"x").expect("write");
        assert!(dir.path().join("api_server_1-2025-06-01.log").exists());
    }

    #[test]
    fn foreign_files_are_left_alone() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("notes.txt"), "keep me").expect("seed");
        let writer = DailyLogFiles::new(dir.path().to_path_buf(), "api", 1);
        writer.write_dated("2025-06-01", b"x").expect("write");
        writer.write_dated("2025-06-02", b"x").expect("write");
        assert!(dir.path().join("notes.txt").exists());
    }
}
