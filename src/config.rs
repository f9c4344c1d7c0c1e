//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración leída una sola vez al arrancar, desde argumentos CLI o
//! variables de entorno, y pasada por valor al servidor.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./epoll_webserver --port 8080 \
//!   --root ./resources \
//!   --workers 8 \
//!   --queue-capacity 1000 \
//!   --edge-triggered true
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=0.0.0.0 WORKERS=0 ./epoll_webserver
//! ```

use crate::error::ServerError;
use crate::logging::LogConfig;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

/// Protocolo que atiende cada conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    /// Archivos estáticos sobre HTTP/1.x
    Http,

    /// Devuelve los bytes recibidos
    Echo,
}

/// Configuración del servidor
#[derive(Debug, Clone, Parser)]
#[command(name = "epoll_webserver")]
#[command(about = "Servidor TCP/HTTP concurrente basado en epoll")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Backlog de `listen(2)`
    #[arg(long, default_value = "5", env = "BACKLOG")]
    pub backlog: i32,

    /// Directorio raíz de los archivos estáticos
    #[arg(long, default_value = "./resources", env = "RESOURCE_ROOT")]
    pub root: PathBuf,

    /// Registrar los fds en modo edge-triggered (`false` = level-triggered)
    #[arg(
        long = "edge-triggered",
        default_value_t = true,
        action = ArgAction::Set,
        env = "EDGE_TRIGGERED"
    )]
    pub edge_triggered: bool,

    // === Workers ===
    /// Número de workers (0 = procesar en el thread del reactor)
    #[arg(long, default_value = "4", env = "WORKERS")]
    pub workers: usize,

    /// Capacidad de la cola de trabajo
    #[arg(long = "queue-capacity", default_value = "1000", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Reactor ===
    /// Máximo de eventos por llamada a `epoll_wait`
    #[arg(long = "max-events", default_value = "1024", env = "MAX_EVENTS")]
    pub max_events: usize,

    /// Máximo de conexiones simultáneas
    #[arg(long = "max-connections", default_value = "65536", env = "MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Protocolo de las conexiones
    #[arg(long, value_enum, default_value_t = Protocol::Http, env = "PROTOCOL")]
    pub protocol: Protocol,

    // === Logging ===
    /// Nivel de log (`RUST_LOG` tiene prioridad)
    #[arg(long = "log-level", default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Archivo de log (sin valor = stderr)
    #[arg(long = "log-file", env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Capacidad de la cola del sink de logs
    #[arg(long = "log-queue-capacity", default_value = "1024", env = "LOG_QUEUE_CAPACITY")]
    pub log_queue_capacity: usize,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use epoll_webserver::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Valida la configuración completa
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port == 0 {
            return Err(ServerError::Config("port must be 1-65535".to_string()));
        }
        self.validate_limits()
    }

    /// Valida todo menos el puerto
    ///
    /// El puerto 0 (efímero) se acepta al crear un servidor desde código.
    pub fn validate_limits(&self) -> Result<(), ServerError> {
        let checks = [
            (self.backlog > 0, "backlog must be >= 1"),
            (self.queue_capacity > 0, "queue capacity must be >= 1"),
            (self.max_events > 0, "max events must be >= 1"),
            (self.max_connections > 0, "max connections must be >= 1"),
            (self.log_queue_capacity > 0, "log queue capacity must be >= 1"),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ServerError::Config(message.to_string())),
            None => Ok(()),
        }
    }

    /// Configuración del sink de logs
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            file: self.log_file.clone(),
            queue_capacity: self.log_queue_capacity,
        }
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            protocol = ?self.protocol,
            root = %self.root.display(),
            "network"
        );
        info!(
            edge_triggered = self.edge_triggered,
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            max_events = self.max_events,
            max_connections = self.max_connections,
            "reactor"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backlog: 5,
            root: PathBuf::from("./resources"),
            edge_triggered: true,
            workers: 4,
            queue_capacity: 1000,
            max_events: 1024,
            max_connections: 65536,
            protocol: Protocol::Http,
            log_level: "info".to_string(),
            log_file: None,
            log_queue_capacity: 1024,
        }
    }
}
