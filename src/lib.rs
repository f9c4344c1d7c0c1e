//! # Epoll Webserver
//! src/lib.rs
//!
//! Núcleo de un servidor TCP/HTTP concurrente: un thread reactor sobre
//! epoll, un pool de workers alimentado por una cola bloqueante acotada
//! y un thread de logs que consume la misma clase de cola.
//!
//! ## Arquitectura
//!
//! - `server`: socket de escucha, poller epoll, reactor y pool de workers
//! - `connection`: máquina de estados de I/O no bloqueante por cliente
//! - `buffer`: buffer de bytes con índices de lectura y escritura
//! - `sync`: `BlockQueue`, la cola acotada productor/consumidor
//! - `service`: lo que se hace con cada petición completa (`Service`)
//! - `http`: parser HTTP/1.x y servicio de archivos estáticos
//! - `logging`: capa de `tracing` hacia el sink asíncrono
//! - `metrics`: contadores del servidor
//! - `config`, `error`: configuración y errores de arranque
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use epoll_webserver::config::Config;
//! use epoll_webserver::server::Server;
//!
//! let server = Server::bind(Config::default())?;
//! server.run()?;
//! # Ok::<(), epoll_webserver::error::ServerError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod service;
pub mod sync;
