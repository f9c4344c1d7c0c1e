//! # Errores del Servidor
//! src/error.rs
//!
//! Errores de arranque y configuración. Los errores de una conexión
//! individual no llegan aquí: se registran y la conexión se cierra.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Resultado con `ServerError`
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errores que impiden arrancar o mantener el servidor
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("poller error: {0}")]
    Poller(#[source] io::Error),

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
