//! # Servicio HTTP de Archivos Estáticos
//! src/http/service.rs
//!
//! Resuelve cada request contra un directorio raíz:
//!
//! | Caso | Respuesta |
//! |------|-----------|
//! | `/` | `/index.html` |
//! | path con `..` | 403 |
//! | no existe o es directorio | 404 |
//! | sin permiso de lectura | 403 |
//! | request malformado | 400 + `Connection: close` |
//!
//! Si existe `<código>.html` en la raíz se usa como página de error.

use super::request::{ParseError, Request};
use super::response::{content_type, Response};
use super::{Method, StatusCode};
use crate::service::{Processed, Service};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Servicio de archivos estáticos
#[derive(Debug, Clone)]
pub struct HttpService {
    root: PathBuf,
}

impl HttpService {
    /// Crea el servicio sobre un directorio raíz
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directorio raíz
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Construye la respuesta para un request ya parseado
    fn respond(&self, request: &Request) -> Response {
        let relative = match self.resolve(request.path()) {
            Some(relative) => relative,
            None => return self.error_page(StatusCode::Forbidden, "Path outside of document root"),
        };

        let full = self.root.join(&relative);
        match open_file(&full) {
            Ok(map) => with_mapped(Response::new(StatusCode::Ok), map)
                .with_header("Content-Type", content_type(&full)),
            Err(status) => {
                debug!(path = %full.display(), status = status.as_u16(), "static file not served");
                self.error_page(status, status.reason_phrase())
            }
        }
    }

    /// Traduce el path del request a uno relativo a la raíz
    ///
    /// Retorna `None` si intenta salir de la raíz.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let relative = if trimmed.is_empty() {
            PathBuf::from("index.html")
        } else {
            PathBuf::from(trimmed)
        };

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }

        // "/login" → "/login.html" cuando existe la página
        if relative.extension().is_none() {
            let html = relative.with_extension("html");
            if self.root.join(&html).is_file() {
                return Some(html);
            }
        }

        Some(relative)
    }

    /// Página de error: `<código>.html` de la raíz si existe, si no una genérica
    fn error_page(&self, status: StatusCode, message: &str) -> Response {
        let custom = self.root.join(format!("{}.html", status.as_u16()));

        match open_file(&custom) {
            Ok(map) => with_mapped(Response::new(status), map).with_header("Content-Type", "text/html"),
            Err(_) => Response::error(status, message),
        }
    }

    /// Respuesta 400 para un request que no se pudo parsear
    fn bad_request(&self, err: &ParseError) -> Response {
        let status = match err {
            ParseError::BodyTooLarge(_) => StatusCode::PayloadTooLarge,
            _ => StatusCode::BadRequest,
        };
        self.error_page(status, &err.to_string())
    }
}

/// Abre y mapea un archivo regular (`None` si está vacío)
fn open_file(path: &Path) -> Result<Option<Mmap>, StatusCode> {
    let metadata = path.metadata().map_err(|e| status_for(&e))?;
    if !metadata.is_file() {
        return Err(StatusCode::NotFound);
    }

    let file = File::open(path).map_err(|e| status_for(&e))?;
    if metadata.len() == 0 {
        return Ok(None);
    }

    // SAFETY: el archivo se trata como de solo lectura; si otro proceso
    // lo trunca mientras se envía, el contenido servido queda indefinido
    // pero la memoria sigue mapeada.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| {
        warn!(path = %path.display(), error = %e, "mmap failed");
        StatusCode::InternalServerError
    })?;

    Ok(Some(map))
}

fn with_mapped(response: Response, map: Option<Mmap>) -> Response {
    match map {
        Some(map) => response.with_file(map),
        None => response,
    }
}

fn status_for(err: &io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
        _ => StatusCode::NotFound,
    }
}

impl Service for HttpService {
    fn process(&self, input: &[u8]) -> Processed {
        match Request::parse(input) {
            Err(ParseError::Incomplete) => Processed::Incomplete,
            Err(err) => {
                debug!(error = %err, "malformed request");
                Processed::Ready {
                    // El resto del buffer no es confiable: se descarta
                    consumed: input.len(),
                    reply: self.bad_request(&err).keep_alive(false).into_reply(false),
                    keep_alive: false,
                }
            }
            Ok((request, consumed)) => {
                let keep_alive = request.is_keep_alive();
                let head_only = request.method() == Method::HEAD;

                debug!(
                    method = request.method().as_str(),
                    path = request.path(),
                    keep_alive,
                    "request"
                );

                Processed::Ready {
                    consumed,
                    reply: self.respond(&request).keep_alive(keep_alive).into_reply(head_only),
                    keep_alive,
                }
            }
        }
    }

    fn overloaded(&self) -> Option<Vec<u8>> {
        let response = Response::error(StatusCode::ServiceUnavailable, "Server busy")
            .keep_alive(false);
        Some(response.to_bytes())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
