//! # Registro de Log
//! src/logging/record.rs

use chrono::{DateTime, Local};
use std::fmt;

/// Nivel de un registro
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Etiqueta usada en el archivo de log
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            // TRACE se agrupa con DEBUG
            _ => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lo que viaja por la cola hacia el sink
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogRecord {
    /// Crea un registro con la hora actual
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Local::now(),
            message: message.into(),
        }
    }

    /// Línea lista para escribir (sin salto de línea):
    /// `2024-05-01 13:45:07.123456 [info]: mensaje`
    pub fn format(&self) -> String {
        format!(
            "{} [{}]: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.level,
            self.message
        )
    }
}
