//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Implementación mínima de HTTP/1.0 y HTTP/1.1 para servir archivos
//! estáticos sobre el reactor:
//!
//! - Parsing incremental de requests (request line, headers, body por
//!   `Content-Length`)
//! - Construcción de responses en dos segmentos (encabezado + cuerpo)
//! - Manejo de status codes
//! - `HttpService`, que implementa `crate::service::Service`
//!
//! ## Conexiones persistentes
//!
//! HTTP/1.1 mantiene la conexión salvo `Connection: close`; HTTP/1.0 solo
//! con `Connection: keep-alive`. Requests encadenados (pipelining) se
//! atienden en orden, uno por respuesta.

pub mod request;
pub mod response;
pub mod service;
pub mod status;

pub use request::{Method, ParseError, Request};
pub use response::Response;
pub use service::HttpService;
pub use status::StatusCode;
