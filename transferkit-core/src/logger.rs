//! Forwarding of `log` records to a host-provided sink.
//!
//! Mobile hosts have no stderr worth reading, so the library logs through the
//! `log` facade and the host installs a [`Logger`] once at startup. Native
//! hosts that already run a `log`/`tracing` subscriber do not need this.
//!
//! ```rust
//! use std::sync::Arc;
//! use transferkit_core::logger::{set_logger, LogLevel, Logger};
//!
//! struct StderrLogger;
//!
//! impl Logger for StderrLogger {
//!     fn log(&self, level: LogLevel, message: String) {
//!         eprintln!("[{level:?}] {message}");
//!     }
//! }
//!
//! set_logger(Arc::new(StderrLogger));
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Receives formatted log lines from the library.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Handles one log line.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Per-frame detail.
    Trace,
    /// Session transitions.
    Debug,
    /// Milestones such as authorization or completion.
    Info,
    /// Recoverable problems such as a rejected passphrase.
    Warn,
    /// Session failures.
    Error,
}

impl LogLevel {
    const fn from_log(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }

    const fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Trace as u8);

struct ForeignLogger;

impl log::Log for ForeignLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        LogLevel::from_log(metadata.level()) as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Debug and trace lines from dependencies are noise for the host.
        let from_transferkit = record
            .module_path()
            .is_some_and(|module_path| module_path.starts_with("transferkit"));
        let verbose = matches!(record.level(), log::Level::Debug | log::Level::Trace);
        if verbose && !from_transferkit {
            return;
        }

        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(LogLevel::from_log(record.level()), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs the host sink. Only the first call takes effect.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        log::warn!("logger already set; ignoring");
        return;
    }

    static LOGGER: ForeignLogger = ForeignLogger;
    if let Err(err) = log::set_logger(&LOGGER) {
        eprintln!("failed to install transferkit logger: {err}");
        return;
    }
    log::set_max_level(log::LevelFilter::Trace);
}

/// Drops lines below `level` before they reach the sink.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_log_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
    if LOGGER_INSTANCE.get().is_some() {
        log::set_max_level(level.to_filter());
    }
}
