/// Console + size-capped rotating file logging behind the `log` facade.
///
/// The console sink is a plain `env_logger` logger (so `RUST_LOG` works as
/// usual).  The file sink appends timestamped lines to
/// `<dir>/vanished-root-handler.log` and rotates it into `.1`, `.2`, … once it
/// would exceed the size limit.
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use log::{LevelFilter, Log, Metadata, Record};

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "vanished-root-handler.log";

/// Append-only log file that keeps at most `count` generations of at most
/// `limit` bytes each.
pub struct RotatingFile {
    path: PathBuf,
    limit: u64,
    count: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: PathBuf, limit: u64, count: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            limit,
            count: count.max(1),
            file,
            written,
        })
    }

    /// `<path>.<n>` for generation `n` (generation 0 is the live file).
    fn generation(&self, n: u32) -> PathBuf {
        if n == 0 {
            return self.path.clone();
        }
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        let oldest = self.count - 1;
        if oldest == 0 {
            self.file.set_len(0)?;
        } else {
            for n in (0..oldest).rev() {
                let from = self.generation(n);
                if from.exists() {
                    std::fs::rename(&from, self.generation(n + 1))?;
                }
            }
        }
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let len = line.len() as u64 + 1;
        if self.written > 0 && self.written + len > self.limit {
            self.rotate()?;
        }
        writeln!(self.file, "{line}")?;
        self.written += len;
        Ok(())
    }
}

/// Forwards every record to the console logger and, if open, the log file.
struct TeeLogger {
    console: env_logger::Logger,
    file: Option<Mutex<RotatingFile>>,
    level: LevelFilter,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.console.enabled(record.metadata()) {
            self.console.log(record);
        }
        if let Some(file) = &self.file {
            let line = format_file_line(record);
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            // Nowhere left to report a failing log file to.
            let _ = file.write_line(&line);
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            let _ = file
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .file
                .flush();
        }
    }
}

fn format_file_line(record: &Record) -> String {
    format!(
        "{} {:<5} {} {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Log file location: the configured directory or the system temp directory.
pub fn log_file_path(config: &LoggingConfig) -> PathBuf {
    config
        .directory
        .clone()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOG_FILE_NAME)
}

/// Installs the global logger.  A log file that cannot be opened only costs
/// the file sink; it is reported on the console.
pub fn init(config: &LoggingConfig) {
    let console = env_logger::Builder::new()
        .parse_filters(&config.level)
        .parse_default_env()
        .build();
    let level = console.filter();

    let path = log_file_path(config);
    let (file, file_error) = match RotatingFile::open(path.clone(), config.file_size_limit, config.file_count) {
        Ok(file) => (Some(Mutex::new(file)), None),
        Err(e) => (None, Some(e)),
    };

    let logger = TeeLogger { console, file, level };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }

    match file_error {
        None => log::info!("Logging to {}", path.display()),
        Some(e) => log::error!("Can not create log file {}: {e}", path.display()),
    }
}
