//! # Servicios (Procesamiento de Requests)
//! src/service.rs
//!
//! La conexión no sabe nada del protocolo: le entrega los bytes acumulados
//! a un `Service` y recibe de vuelta una respuesta en dos segmentos
//! (encabezado + cuerpo) lista para un envío vectorizado.
//!
//! Servicios incluidos:
//! - `EchoService`: devuelve los mismos bytes que recibe
//! - `crate::http::HttpService`: archivos estáticos sobre HTTP/1.x

use memmap2::Mmap;
use std::fmt;

/// Resultado de procesar el buffer de lectura
#[derive(Debug)]
pub enum Processed {
    /// Aún no hay un request completo; esperar más datos
    Incomplete,

    /// Hay respuesta lista
    Ready {
        /// Bytes del buffer de lectura que el request consumió
        consumed: usize,

        /// Respuesta a enviar
        reply: Reply,

        /// Mantener la conexión abierta después de enviar
        keep_alive: bool,
    },
}

/// Respuesta separada en encabezado y cuerpo
#[derive(Debug, Default)]
pub struct Reply {
    /// Primer segmento (status line + headers, o los datos en echo)
    pub header: Vec<u8>,

    /// Segundo segmento
    pub body: Body,
}

impl Reply {
    /// Respuesta que solo tiene el primer segmento
    pub fn bytes(header: Vec<u8>) -> Self {
        Self {
            header,
            body: Body::Empty,
        }
    }

    /// Total de bytes a enviar
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Verifica si no hay nada que enviar
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Origen del cuerpo de la respuesta
///
/// Un archivo se mapea en memoria y se envía como segundo segmento
/// del `writev`, sin copiarlo al buffer de escritura.
#[derive(Default)]
pub enum Body {
    /// Sin cuerpo
    #[default]
    Empty,

    /// Cuerpo en memoria
    Bytes(Vec<u8>),

    /// Archivo mapeado en memoria
    File(Mmap),
}

impl Body {
    /// Vista del cuerpo completo
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Bytes(bytes) => bytes.as_slice(),
            Body::File(map) => &map[..],
        }
    }

    /// Longitud del cuerpo
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Verifica si el cuerpo está vacío
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::File(map) => write!(f, "Body::File({} bytes)", map.len()),
        }
    }
}

/// Colaborador que convierte bytes de entrada en una respuesta
///
/// Se comparte entre el reactor y todos los workers, por eso es
/// `Send + Sync` y recibe `&self`.
pub trait Service: Send + Sync + 'static {
    /// Procesa los bytes acumulados de una conexión
    fn process(&self, input: &[u8]) -> Processed;

    /// Respuesta best-effort para una conexión rechazada por sobrecarga
    fn overloaded(&self) -> Option<Vec<u8>> {
        None
    }

    /// Nombre para logs
    fn name(&self) -> &'static str;
}

/// Servicio de eco: responde con los mismos bytes recibidos
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl Service for EchoService {
    fn process(&self, input: &[u8]) -> Processed {
        if input.is_empty() {
            return Processed::Incomplete;
        }

        Processed::Ready {
            consumed: input.len(),
            reply: Reply::bytes(input.to_vec()),
            keep_alive: true,
        }
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
