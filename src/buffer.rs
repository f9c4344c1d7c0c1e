//! # Buffer de Conexión
//! src/buffer.rs
//!
//! Buffer creciente sobre `BytesMut`:
//!
//! ```text
//! | ya consumido | legible (len) | escribible (capacity - len) |
//! ```
//!
//! Leer del socket agrega al final; consumir datos avanza el inicio
//! (`Buf::advance`). Cuando falta espacio, `BytesMut::reserve` reutiliza
//! el prefijo consumido (compacta) antes de pedir más memoria.

use bytes::{Buf, BytesMut};
use std::io::{self, Read};

/// Espacio libre mínimo antes de cada lectura del socket
const MIN_READ_SPACE: usize = 4096;

/// Capacidad inicial
const INITIAL_SIZE: usize = 1024;

/// Buffer con cursor de lectura y de escritura
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    storage: BytesMut,
}

impl Buffer {
    /// Crea un buffer con la capacidad inicial por defecto
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SIZE)
    }

    /// Crea un buffer con una capacidad inicial dada
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes pendientes de consumir
    pub fn readable_bytes(&self) -> usize {
        self.storage.len()
    }

    /// Bytes libres al final, sin compactar ni crecer
    pub fn writable_bytes(&self) -> usize {
        self.storage.capacity() - self.storage.len()
    }

    /// Verifica si no hay nada pendiente
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Vista de los bytes pendientes, sin consumirlos
    pub fn peek(&self) -> &[u8] {
        &self.storage
    }

    /// Consume `len` bytes del inicio
    ///
    /// # Panics
    ///
    /// Si `len` supera los bytes legibles.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_bytes(), "retrieve past write cursor");
        self.storage.advance(len);
    }

    /// Consume todo
    pub fn retrieve_all(&mut self) {
        self.storage.clear();
    }

    /// Agrega bytes al final
    pub fn append(&mut self, data: &[u8]) {
        self.storage.extend_from_slice(data);
    }

    /// Garantiza al menos `len` bytes escribibles al final
    pub fn ensure_writable(&mut self, len: usize) {
        self.storage.reserve(len);
    }

    /// Hace una única lectura desde `source` hacia el espacio libre
    ///
    /// Retorna lo mismo que `Read::read`: `Ok(0)` significa EOF y los
    /// errores (incluido `WouldBlock`) se propagan sin tocar lo legible.
    pub fn read_from<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<usize> {
        self.ensure_writable(MIN_READ_SPACE);

        let start = self.storage.len();
        let spare = self.writable_bytes();
        self.storage.resize(start + spare, 0);

        match source.read(&mut self.storage[start..]) {
            Ok(n) => {
                self.storage.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.storage.truncate(start);
                Err(e)
            }
        }
    }

    /// Libera la memoria
    pub fn release(&mut self) {
        self.storage = BytesMut::new();
    }
}
