/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * MongoDB wire-protocol client core
 *
 * @file logging.rs
 * @brief Structured logging for connection, auth, and cursor lifecycle events
 */

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO "),
            LogLevel::Warning => write!(f, "WARN "),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Clone)]
pub struct ClientLogger {
    level: LogLevel,
}

impl ClientLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if level < self.level {
            return;
        }
        let now: DateTime<Utc> = Utc::now();
        eprintln!(
            "{} {} mongowire [{}]",
            level,
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            message
        );
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

static GLOBAL_LOGGER: Mutex<Option<ClientLogger>> = Mutex::new(None);

/// Installs both the crate's own logger (used by the `fauxdb_client_*!`
/// macros) and a `tracing_subscriber` `EnvFilter` layer, so callers who
/// already use `tracing` elsewhere in their process see the same events.
pub fn init_logger(level: LogLevel) {
    {
        let mut global = GLOBAL_LOGGER.lock().unwrap();
        *global = Some(ClientLogger::new(level));
    }

    let filter = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warning => "warn",
        LogLevel::Error => "error",
    };

    // Best-effort: a subscriber may already be installed by the host
    // application, in which case this silently no-ops.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}

pub fn get_logger() -> Option<ClientLogger> {
    GLOBAL_LOGGER.lock().unwrap().clone()
}

#[macro_export]
macro_rules! fauxdb_client_debug {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logging::get_logger() {
            logger.debug(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! fauxdb_client_info {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logging::get_logger() {
            logger.info(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! fauxdb_client_warn {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logging::get_logger() {
            logger.warning(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! fauxdb_client_error {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::logging::get_logger() {
            logger.error(&format!($($arg)*));
        }
    };
}
