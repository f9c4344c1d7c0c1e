//! # Parsing de Requests HTTP/1.x
//! src/http/request.rs
//!
//! Parser incremental: recibe lo que haya en el buffer de lectura y
//! responde si ya hay un request completo, cuántos bytes ocupa, o si
//! hay que esperar más datos.
//!
//! ## Formato de un Request
//!
//! ```text
//! POST /login HTTP/1.1\r\n
//! Host: localhost:8080\r\n
//! Content-Length: 26\r\n
//! \r\n
//! username=ana&password=1234
//! ```
//!
//! Los nombres de headers se guardan en minúsculas.

use std::collections::HashMap;
use thiserror::Error;

/// Tamaño máximo de request line + headers
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Tamaño máximo del body aceptado
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Métodos HTTP soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Obtener un recurso
    GET,

    /// HEAD - Como GET pero solo retorna headers
    HEAD,

    /// POST - Enviar datos a un recurso
    POST,
}

impl Method {
    fn parse(s: &str) -> Result<Self, ParseError> {
        match s {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            _ => Err(ParseError::UnsupportedMethod(s.to_string())),
        }
    }

    /// Convierte el método a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
        }
    }
}

/// Errores que pueden ocurrir durante el parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Faltan bytes; no es un error del cliente (todavía)
    #[error("incomplete HTTP request")]
    Incomplete,

    #[error("request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("request body of {0} bytes is too large")]
    BodyTooLarge(usize),

    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid HTTP version: {0}")]
    InvalidHttpVersion(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// Representa un request HTTP parseado
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,

    /// Path ya decodificado (sin query string)
    path: String,

    query_params: HashMap<String, String>,

    /// Headers con nombre en minúsculas
    headers: HashMap<String, String>,

    /// "HTTP/1.0" o "HTTP/1.1"
    version: String,

    body: Vec<u8>,
}

impl Request {
    /// Intenta parsear un request desde el inicio de `buffer`
    ///
    /// # Retorna
    ///
    /// * `Ok((request, consumed))` - request completo y bytes que ocupa
    /// * `Err(ParseError::Incomplete)` - hay que esperar más datos
    /// * `Err(_)` - request inválido
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use epoll_webserver::http::Request;
    ///
    /// let raw = b"GET /index.html?lang=es HTTP/1.1\r\n\r\nGET /next";
    /// let (request, consumed) = Request::parse(raw).unwrap();
    ///
    /// assert_eq!(request.path(), "/index.html");
    /// assert_eq!(request.query_param("lang"), Some("es"));
    /// assert_eq!(consumed, 36);
    /// ```
    pub fn parse(buffer: &[u8]) -> Result<(Self, usize), ParseError> {
        let header_end = match find_subslice(buffer, b"\r\n\r\n") {
            Some(pos) => pos,
            None if buffer.len() > MAX_HEADER_BYTES => {
                return Err(ParseError::HeadersTooLarge(MAX_HEADER_BYTES));
            }
            None => return Err(ParseError::Incomplete),
        };

        if header_end > MAX_HEADER_BYTES {
            return Err(ParseError::HeadersTooLarge(MAX_HEADER_BYTES));
        }

        let head = std::str::from_utf8(&buffer[..header_end])
            .map_err(|_| ParseError::InvalidRequestLine)?;

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();

        // 1. Request line
        let (method, path, query_params, version) = Self::parse_request_line(request_line)?;

        // 2. Headers
        let headers = Self::parse_headers(lines)?;

        // 3. Body (según Content-Length)
        let content_length = match headers.get("content-length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(value.clone()))?,
            None => 0,
        };

        if content_length > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge(content_length));
        }

        let body_start = header_end + 4;
        let body_end = body_start + content_length;
        if buffer.len() < body_end {
            return Err(ParseError::Incomplete);
        }

        let request = Request {
            method,
            path,
            query_params,
            headers,
            version,
            body: buffer[body_start..body_end].to_vec(),
        };

        Ok((request, body_end))
    }

    /// Parsea la request line: `GET /path?query HTTP/1.1`
    fn parse_request_line(
        line: &str,
    ) -> Result<(Method, String, HashMap<String, String>, String), ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(ParseError::InvalidRequestLine);
        }

        let method = Method::parse(parts[0])?;

        if !parts[1].starts_with('/') {
            return Err(ParseError::InvalidRequestLine);
        }
        let (path, query_params) = Self::parse_path_and_query(parts[1]);

        let version = parts[2].to_string();
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            return Err(ParseError::InvalidHttpVersion(version));
        }

        Ok((method, path, query_params, version))
    }

    /// Separa el path de la query string
    fn parse_path_and_query(target: &str) -> (String, HashMap<String, String>) {
        match target.split_once('?') {
            Some((path, query)) => (url_decode(path), parse_urlencoded(query)),
            None => (url_decode(target), HashMap::new()),
        }
    }

    /// Parsea los headers (`Name: Value`, nombre en minúsculas)
    fn parse_headers<'a>(
        lines: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, String>, ParseError> {
        let mut headers = HashMap::new();

        for line in lines {
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
                _ => return Err(ParseError::InvalidHeader(line.to_string())),
            }
        }

        Ok(headers)
    }

    /// Obtiene el método HTTP del request
    pub fn method(&self) -> Method {
        self.method
    }

    /// Obtiene el path del request
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Obtiene todos los query parameters
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Obtiene un query parameter específico
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }

    /// Obtiene todos los headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Obtiene un header (sin distinguir mayúsculas)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Obtiene la versión HTTP
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Obtiene el body del request
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decide si la conexión sigue abierta después de responder
    ///
    /// HTTP/1.1 es persistente salvo `Connection: close`; HTTP/1.0 solo
    /// con `Connection: keep-alive` explícito.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.header("connection").map(|v| v.to_ascii_lowercase());

        match self.version.as_str() {
            "HTTP/1.1" => connection.as_deref() != Some("close"),
            _ => connection.as_deref() == Some("keep-alive"),
        }
    }
}

/// Busca `needle` dentro de `haystack`
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parsea `a=1&b=2` en un HashMap
fn parse_urlencoded(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in query.split('&') {
        if param.is_empty() {
            continue;
        }

        match param.split_once('=') {
            Some((key, value)) => params.insert(url_decode(key), url_decode(value)),
            // Parámetro sin valor (ej: "?debug")
            None => params.insert(url_decode(param), String::new()),
        };
    }

    params
}

/// Decodifica `%XX` y `+`; las secuencias inválidas quedan tal cual
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
