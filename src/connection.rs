//! # Conexión (Máquina de Estados de I/O)
//! src/connection.rs
//!
//! Cada conexión aceptada es dueña de su socket no bloqueante, de sus
//! buffers de lectura/escritura y del estado del request/response en curso.
//!
//! ## Estados
//!
//! ```text
//! Idle → ReadingRequest → Processing → WritingResponse → Idle (keep-alive)
//!                                                      ↘ Closing
//! ```
//!
//! La conexión es genérica sobre el stream (`Read + Write`), así la
//! lógica de lectura/escritura parcial se prueba con un stream simulado
//! sin sockets reales.

use crate::buffer::Buffer;
use crate::metrics::ServerMetrics;
use crate::service::{Body, Processed, Service};
use std::fmt;
use std::io::{self, IoSlice, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Conexión sobre un socket TCP real
pub type TcpConnection = Connection<TcpStream>;

/// Estado de la conexión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Sin request en curso
    Idle,

    /// Acumulando bytes de un request
    ReadingRequest,

    /// En manos del servicio
    Processing,

    /// Quedan bytes de la respuesta por enviar
    WritingResponse,

    /// Debe cerrarse
    Closing,
}

/// Resultado de una pasada de lectura
#[derive(Debug)]
pub enum ReadStatus {
    /// Se leyó hasta `WouldBlock` (o una vez, en modo level-triggered)
    Drained(usize),

    /// El peer cerró su lado (lectura de cero bytes)
    PeerClosed,

    /// Error fatal de lectura
    Failed(io::Error),
}

/// Resultado de una pasada de escritura
#[derive(Debug)]
pub enum WriteStatus {
    /// Respuesta enviada completa
    Complete,

    /// El socket no acepta más por ahora; hay que esperar `EPOLLOUT`
    WouldBlock,

    /// Error fatal de escritura
    Failed(io::Error),
}

/// Lo que todas las conexiones de un servidor comparten
#[derive(Clone)]
pub struct ConnContext {
    /// Servicio que procesa los requests
    pub service: Arc<dyn Service>,

    /// Métricas del servidor (contador de conexiones vivas)
    pub metrics: Arc<ServerMetrics>,

    /// En edge-triggered hay que leer hasta `WouldBlock` en cada evento
    pub edge_triggered: bool,
}

impl fmt::Debug for ConnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnContext")
            .field("service", &self.service.name())
            .field("edge_triggered", &self.edge_triggered)
            .finish()
    }
}

/// Conexión de un cliente
pub struct Connection<S> {
    fd: RawFd,
    peer: SocketAddr,
    stream: S,

    read_buf: Buffer,

    /// Primer segmento de la respuesta (encabezado)
    write_buf: Buffer,

    /// Segundo segmento de la respuesta y cuánto ya se envió
    body: Body,
    body_sent: usize,

    state: ConnState,
    keep_alive: bool,

    /// El peer ya no enviará más datos
    peer_closed: bool,

    /// Hay bytes nuevos que el servicio todavía no vio
    pending_input: bool,

    /// Guard para que `close()` sea idempotente
    closed: bool,

    context: ConnContext,
}

impl<S> Connection<S> {
    /// Crea la conexión para un socket recién aceptado
    ///
    /// Incrementa el contador de conexiones vivas; `close()` (o `Drop`)
    /// lo decrementa exactamente una vez.
    pub fn new(stream: S, fd: RawFd, peer: SocketAddr, context: ConnContext) -> Self {
        context.metrics.connection_opened();

        Self {
            fd,
            peer,
            stream,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            body: Body::Empty,
            body_sent: 0,
            state: ConnState::Idle,
            keep_alive: false,
            peer_closed: false,
            pending_input: false,
            closed: false,
            context,
        }
    }

    /// Cierra la conexión (idempotente)
    ///
    /// Libera los buffers y decrementa el contador. El descriptor se
    /// cierra cuando se destruye el stream; el reactor lo saca de epoll
    /// y de su tabla antes de eso.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.state = ConnState::Closing;
        self.read_buf.release();
        self.write_buf.release();
        self.body = Body::Empty;
        self.body_sent = 0;
        self.context.metrics.connection_closed();

        debug!(
            fd = self.fd,
            peer = %self.peer,
            live = self.context.metrics.live_connections(),
            "connection closed"
        );
    }

    /// Descriptor del socket
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Dirección del cliente
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Estado actual
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// La respuesta en curso (o la última) pidió mantener la conexión
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// El peer cerró su lado de escritura
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// `close()` ya fue llamado
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes de la respuesta pendientes de envío
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_bytes() + (self.body.len() - self.body_sent)
    }

    /// Hay bytes sin procesar y la conexión puede procesarlos
    pub fn wants_process(&self) -> bool {
        self.pending_input
            && !self.read_buf.is_empty()
            && matches!(self.state, ConnState::Idle | ConnState::ReadingRequest)
    }

    /// Entrega los bytes acumulados al servicio
    ///
    /// Retorna `true` si quedó una respuesta lista para enviar.
    pub fn process(&mut self) -> bool {
        self.pending_input = false;

        if self.closed || self.read_buf.is_empty() {
            return false;
        }

        self.state = ConnState::Processing;
        let started = Instant::now();

        match self.context.service.process(self.read_buf.peek()) {
            Processed::Incomplete => {
                self.state = if self.peer_closed {
                    // No van a llegar más bytes: el request nunca se completará
                    ConnState::Closing
                } else {
                    ConnState::ReadingRequest
                };
                false
            }
            Processed::Ready {
                consumed,
                reply,
                keep_alive,
            } => {
                let consumed = consumed.min(self.read_buf.readable_bytes());
                self.read_buf.retrieve(consumed);

                self.write_buf.append(&reply.header);
                self.body = reply.body;
                self.body_sent = 0;

                self.keep_alive = keep_alive && !self.peer_closed;
                self.state = ConnState::WritingResponse;
                self.context.metrics.record_request(started.elapsed());
                true
            }
        }
    }

    /// Avanza los cursores de ambos segmentos tras enviar `n` bytes
    fn advance(&mut self, n: usize) {
        let header_len = self.write_buf.readable_bytes();

        if n <= header_len {
            self.write_buf.retrieve(n);
        } else {
            self.write_buf.retrieve_all();
            self.body_sent += n - header_len;
        }
    }

    /// La respuesta terminó de enviarse
    fn finish_response(&mut self) {
        self.body = Body::Empty;
        self.body_sent = 0;

        if self.keep_alive && !self.peer_closed {
            self.state = ConnState::Idle;
            // Requests encadenados que llegaron junto con el anterior
            self.pending_input = !self.read_buf.is_empty();
        } else {
            self.state = ConnState::Closing;
        }
    }
}

impl<S: Read + Write> Connection<S> {
    /// Lee del socket hacia el buffer de lectura
    ///
    /// En edge-triggered repite hasta `WouldBlock`: no llegará otra
    /// notificación hasta que cambie el estado del socket. En
    /// level-triggered basta una lectura por evento.
    pub fn read(&mut self) -> ReadStatus {
        if self.closed {
            return ReadStatus::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }

        if self.state == ConnState::Idle {
            self.state = ConnState::ReadingRequest;
        }

        let mut total = 0;

        loop {
            match self.read_buf.read_from(&mut self.stream) {
                Ok(0) => {
                    self.peer_closed = true;
                    self.keep_alive = false;

                    if self.read_buf.is_empty() {
                        self.state = ConnState::Closing;
                    }
                    return ReadStatus::PeerClosed;
                }
                Ok(n) => {
                    total += n;
                    self.pending_input = true;

                    if !self.context.edge_triggered {
                        return ReadStatus::Drained(total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ReadStatus::Drained(total);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnState::Closing;
                    return ReadStatus::Failed(e);
                }
            }
        }
    }

    /// Envía la respuesta con `writev` de dos segmentos (encabezado + cuerpo)
    ///
    /// Repite hasta terminar o hasta `WouldBlock`; los cursores de cada
    /// segmento avanzan con lo que el kernel aceptó, así un envío parcial
    /// se retoma exactamente donde quedó.
    pub fn write(&mut self) -> WriteStatus {
        if self.closed {
            return WriteStatus::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already closed",
            ));
        }

        loop {
            if self.to_write_bytes() == 0 {
                self.finish_response();
                return WriteStatus::Complete;
            }

            let header = self.write_buf.peek();
            let body = &self.body.as_slice()[self.body_sent..];
            let result = self
                .stream
                .write_vectored(&[IoSlice::new(header), IoSlice::new(body)]);

            match result {
                Ok(0) => {
                    self.state = ConnState::Closing;
                    return WriteStatus::Failed(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => self.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.state = ConnState::WritingResponse;
                    return WriteStatus::WouldBlock;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnState::Closing;
                    return WriteStatus::Failed(e);
                }
            }
        }
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("keep_alive", &self.keep_alive)
            .field("closed", &self.closed)
            .finish()
    }
}
