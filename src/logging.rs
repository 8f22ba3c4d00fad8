use chrono::Local;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        // pad() so that width specifiers like {:<8} apply
        f.pad(name)
    }
}

struct FileSink {
    path: PathBuf,
    enabled: bool,
}

struct Sinks {
    console: bool,
    file: Option<FileSink>,
}

/// Logging context with a console sink and an optional file sink
///
/// A `Logger` is constructed explicitly and handed to whoever should log
/// through it. Clones share the same sinks, so toggling output on one clone
/// affects all of them.
#[derive(Clone)]
pub struct Logger {
    name: String,
    sinks: Arc<Mutex<Sinks>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("console", &self.has_console_output())
            .field("file", &self.log_file())
            .finish()
    }
}

impl Logger {
    /// Creates a logger writing to stdout only
    pub fn new(name: &str) -> Self {
        Logger {
            name: name.to_string(),
            sinks: Arc::new(Mutex::new(Sinks {
                console: true,
                file: None,
            })),
        }
    }

    /// Creates a logger writing to stdout and to `<log_dir>/<YYYY-MM-DD>.log`
    ///
    /// `log_dir` is created if it does not exist.
    pub fn with_log_dir<P: AsRef<Path>>(name: &str, log_dir: P) -> io::Result<Self> {
        let logger = Logger::new(name);
        logger.add_file_output(log_dir)?;
        Ok(logger)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches (or replaces) the file sink and enables it
    pub fn add_file_output<P: AsRef<Path>>(&self, log_dir: P) -> io::Result<()> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{}.log", Local::now().format("%Y-%m-%d")));
        self.lock().file = Some(FileSink {
            path,
            enabled: true,
        });
        Ok(())
    }

    /// Path of the configured log file, whether enabled or not
    pub fn log_file(&self) -> Option<PathBuf> {
        self.lock().file.as_ref().map(|sink| sink.path.clone())
    }

    pub fn enable_console_output(&self) {
        self.lock().console = true;
    }

    pub fn disable_console_output(&self) {
        self.lock().console = false;
    }

    pub fn has_console_output(&self) -> bool {
        self.lock().console
    }

    /// Re-enables the file sink; no-op when no log directory was configured
    pub fn enable_file_output(&self) {
        if let Some(sink) = self.lock().file.as_mut() {
            sink.enabled = true;
        }
    }

    pub fn disable_file_output(&self) {
        if let Some(sink) = self.lock().file.as_mut() {
            sink.enabled = false;
        }
    }

    pub fn has_file_output(&self) -> bool {
        self.lock().file.as_ref().is_some_and(|sink| sink.enabled)
    }

    pub fn debug(&self, message: &str) -> io::Result<()> {
        self.log(Level::Debug, message)
    }

    pub fn info(&self, message: &str) -> io::Result<()> {
        self.log(Level::Info, message)
    }

    pub fn warning(&self, message: &str) -> io::Result<()> {
        self.log(Level::Warning, message)
    }

    pub fn error(&self, message: &str) -> io::Result<()> {
        self.log(Level::Error, message)
    }

    pub fn critical(&self, message: &str) -> io::Result<()> {
        self.log(Level::Critical, message)
    }

    /// Logs a message with timestamp to every enabled sink
    ///
    /// # Returns
    /// * `io::Result<()>` - Ok on success, Err if appending to the log file fails
    pub fn log(&self, level: Level, message: &str) -> io::Result<()> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let sinks = self.lock();

        if sinks.console {
            println!("{}:{}:{}:{}", timestamp, self.name, level, message);
        }

        if let Some(sink) = sinks.file.as_ref().filter(|sink| sink.enabled) {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&sink.path)?;
            writeln!(file, "{} | {} | {:<8} | {}", timestamp, self.name, level, message)?;
        }

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        // a panic while holding the lock leaves the flags in a usable state
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
