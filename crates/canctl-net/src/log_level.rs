//! Runtime-mutable log verbosity, changed at runtime by `SET_LOG_LEVEL`.
//!
//! A plain numeric threshold stored in an [`AtomicU32`] backs a filter
//! closure consumed by the binary crate's `tracing_subscriber` setup: an
//! event is enabled when its level maps to a number at or above the current
//! threshold. This mirrors the original server's `if (level < log_level)
//! return;` gate, expressed as a `tracing_subscriber::filter::filter_fn`
//! input instead of an early return inside every log call site.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::Level;

/// Verbosity levels in the wire protocol, ordered from most to least chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    NoLog,
}

impl LogLevel {
    /// Numeric ordering from the configuration-file contract: `DEBUG=5 <
    /// INFO=10 < WARNING=20 < ERROR=30 < NOLOG=100`.
    const fn value(self) -> u32 {
        match self {
            LogLevel::Debug => 5,
            LogLevel::Info => 10,
            LogLevel::Warning => 20,
            LogLevel::Error => 30,
            LogLevel::NoLog => 100,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::NoLog => "NOLOG",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "NOLOG" => Ok(LogLevel::NoLog),
            _ => Err(()),
        }
    }
}

/// tracing's event severity, mapped onto the wire protocol's numeric scale.
fn tracing_level_value(level: &Level) -> u32 {
    match *level {
        Level::ERROR => LogLevel::Error.value(),
        Level::WARN => LogLevel::Warning.value(),
        Level::INFO => LogLevel::Info.value(),
        Level::DEBUG | Level::TRACE => LogLevel::Debug.value(),
    }
}

/// Shared handle to the current log threshold, cloned into the client
/// session handler so `SET_LOG_LEVEL` can mutate it from any thread.
#[derive(Clone)]
pub struct LogController {
    threshold: Arc<AtomicU32>,
}

impl LogController {
    pub fn new(initial: LogLevel) -> Self {
        Self {
            threshold: Arc::new(AtomicU32::new(initial.value())),
        }
    }

    pub fn set(&self, level: LogLevel) {
        self.threshold.store(level.value(), Ordering::Relaxed);
    }

    fn is_enabled(&self, event_value: u32) -> bool {
        event_value >= self.threshold.load(Ordering::Relaxed)
    }

    /// Closure usable directly with `tracing_subscriber::filter::filter_fn`,
    /// installed once at startup via `.with_filter(filter_fn(...))`.
    pub fn filter(&self) -> impl Fn(&tracing::Metadata<'_>) -> bool + Send + Sync + 'static {
        let controller = self.clone();
        move |metadata| controller.is_enabled(tracing_level_value(metadata.level()))
    }
}
