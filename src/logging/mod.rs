//! # Módulo de Logging
//! src/logging/mod.rs
//!
//! Los eventos de `tracing` de cualquier thread pasan por un filtro
//! (`RUST_LOG` tiene prioridad sobre el nivel configurado) y terminan en
//! una `BlockQueue<LogRecord>` que consume un único thread de escritura.
//!
//! ```text
//! tracing::info!(..) ──▶ EnvFilter ──▶ AsyncLogLayer ──push──▶ BlockQueue ──pop──▶ log-sink ──▶ archivo / stderr
//! ```

pub mod layer;
pub mod record;
pub mod sink;

pub use layer::AsyncLogLayer;
pub use record::{LogLevel, LogRecord};
pub use sink::AsyncLog;

use crate::error::{Result, ServerError};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Configuración del sink de logs
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directiva de nivel (`info`, `epoll_webserver=debug`, ...)
    pub level: String,

    /// Archivo destino; `None` escribe en stderr
    pub file: Option<PathBuf>,

    /// Capacidad de la cola entre los productores y el sink
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            queue_capacity: 1024,
        }
    }
}

/// Lanza el sink e instala el subscriber global
///
/// El `AsyncLog` devuelto debe mantenerse vivo; al apagarlo se escriben
/// los registros pendientes.
pub fn init(config: &LogConfig) -> Result<AsyncLog> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.level)
            .map_err(|e| ServerError::Config(format!("invalid log level {:?}: {}", config.level, e)))?
    };

    let sink = AsyncLog::start(config)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(AsyncLogLayer::new(sink.queue()))
        .try_init()
        .map_err(|e| ServerError::Config(format!("logging already initialized: {}", e)))?;

    Ok(sink)
}
