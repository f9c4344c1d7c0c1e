//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! Construye la respuesta en dos partes: el encabezado (status line +
//! headers) como bytes y el cuerpo como `Body`, para que la conexión los
//! envíe con un único `writev`.
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: text/html\r\n
//! Content-Length: 1024\r\n
//! Connection: keep-alive\r\n
//! Keep-Alive: max=6, timeout=120\r\n
//! \r\n
//! <contenido del archivo mapeado>
//! ```
//!
//! ## Ejemplo de uso
//!
//! ```
//! use epoll_webserver::http::{Response, StatusCode};
//!
//! let reply = Response::new(StatusCode::Ok)
//!     .with_header("Content-Type", "text/plain")
//!     .with_body("Hello")
//!     .keep_alive(false)
//!     .into_reply(false);
//!
//! assert!(reply.header.starts_with(b"HTTP/1.1 200 OK\r\n"));
//! assert_eq!(reply.body.as_slice(), b"Hello");
//! ```

use super::StatusCode;
use crate::service::{Body, Reply};
use memmap2::Mmap;
use std::collections::HashMap;
use std::path::Path;

/// Valor del header `Keep-Alive` en conexiones persistentes
const KEEP_ALIVE_PARAMS: &str = "max=6, timeout=120";

/// Representa una respuesta HTTP
#[derive(Debug)]
pub struct Response {
    status: StatusCode,

    /// Usamos HashMap para evitar duplicados
    headers: HashMap<String, String>,

    body: Body,
}

impl Response {
    /// Crea una respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Body::Empty,
        }
    }

    /// Agrega un header (si ya existe, se sobrescribe)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    /// Agrega un header a una respuesta existente (versión mutable)
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Establece el cuerpo desde un string
    pub fn with_body(self, body: &str) -> Self {
        self.with_body_bytes(body.as_bytes().to_vec())
    }

    /// Establece el cuerpo desde bytes
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = if body.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(body)
        };
        self
    }

    /// Usa un archivo mapeado en memoria como cuerpo
    pub fn with_file(mut self, map: Mmap) -> Self {
        self.body = Body::File(map);
        self
    }

    /// Agrega `Connection` (y `Keep-Alive` si corresponde)
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        if keep_alive {
            self.add_header("Connection", "keep-alive");
            self.add_header("Keep-Alive", KEEP_ALIVE_PARAMS);
        } else {
            self.add_header("Connection", "close");
            self.headers.remove("Keep-Alive");
        }
        self
    }

    /// Respuesta de error con una página HTML mínima
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = format!(
            "<html><head><title>{status}</title></head><body>\
             <h1>{status}</h1><p>{message}</p><hr><em>epoll_webserver</em>\
             </body></html>"
        );

        Self::new(status)
            .with_header("Content-Type", "text/html")
            .with_body(&body)
    }

    /// Serializa el encabezado
    ///
    /// `Content-Length` siempre refleja el cuerpo, también en respuestas
    /// a HEAD donde el cuerpo no se envía.
    fn header_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(128);

        // 1. Status line
        result.extend_from_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        // 2. Headers
        for (name, value) in &self.headers {
            result.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        result.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());

        // 3. Línea vacía que separa headers del body
        result.extend_from_slice(b"\r\n");

        result
    }

    /// Convierte la respuesta en los dos segmentos a enviar
    ///
    /// Con `head_only` (método HEAD) el cuerpo se descarta.
    pub fn into_reply(self, head_only: bool) -> Reply {
        let header = self.header_bytes();
        let body = if head_only { Body::Empty } else { self.body };

        Reply { header, body }
    }

    /// Encabezado y cuerpo concatenados
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header_bytes();
        bytes.extend_from_slice(self.body.as_slice());
        bytes
    }

    /// Obtiene el código de estado de la respuesta
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Obtiene una referencia a los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene una referencia al body
    pub fn body(&self) -> &Body {
        &self.body
    }
}

/// Tipo MIME según la extensión del archivo
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("xhtml") => "application/xhtml+xml",
        Some("xml") => "text/xml",
        Some("txt") => "text/plain",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("rtf") => "application/rtf",
        Some("pdf") => "application/pdf",
        Some("doc") | Some("word") => "application/msword",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("au") => "audio/basic",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("gz") => "application/x-gzip",
        Some("tar") => "application/x-tar",
        _ => "text/plain",
    }
}
