//! # Reactor
//! src/server/reactor.rs
//!
//! Loop de eventos de un solo thread. Es dueño del socket de escucha,
//! del poller y de la tabla de conexiones indexada por fd.
//!
//! ## Tabla de fds
//!
//! Cada fd registrado en epoll tiene una entrada en la tabla y viceversa.
//! Una entrada puede estar:
//!
//! - `Owned`: la conexión está en manos del reactor
//! - `Lent`: la conexión está en un worker; el fd sigue registrado pero
//!   desarmado (`EPOLLONESHOT`), así que no produce eventos hasta volver
//!
//! ## Registro de clientes
//!
//! Los clientes se registran con `EPOLLONESHOT` (más `EPOLLET` si el modo
//! edge-triggered está activo). Después de atender cada evento el reactor
//! rearma el fd para lectura o para escritura según el estado de la
//! conexión; así nunca hay dos threads con la misma conexión.
//!
//! ## Sin descriptores libres
//!
//! Si `accept` falla con `EMFILE`/`ENFILE` la conexión queda en el backlog
//! y, en edge-triggered, no llega otra notificación hasta que se conecte
//! otro cliente. El reactor guarda un descriptor de reserva (`/dev/null`):
//! lo cierra, acepta la conexión pendiente, la cierra y reabre la reserva.

use crate::config::Config;
use crate::connection::{ConnContext, ConnState, Connection, ReadStatus, TcpConnection, WriteStatus};
use crate::error::{Result, ServerError};
use crate::metrics::ServerMetrics;
use crate::server::poller::{Event, Interest, Mode, Poller, Waker};
use crate::server::worker::WorkerPool;
use crate::service::Service;
use crate::sync::BlockQueue;
use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entrada de la tabla de fds
enum Slot {
    Owned(TcpConnection),
    Lent,
}

/// Dónde se ejecuta `process()`
enum Dispatch {
    /// En el mismo thread del reactor
    Inline,

    /// En el pool de workers
    Pooled {
        queue: BlockQueue<TcpConnection>,
        pool: WorkerPool,
        done: Receiver<TcpConnection>,
    },
}

/// Reactor epoll
pub(crate) struct Reactor {
    listener: TcpListener,
    listen_fd: RawFd,
    poller: Poller,
    connections: HashMap<RawFd, Slot>,
    context: ConnContext,
    client_mode: Mode,
    max_connections: usize,
    dispatch: Dispatch,
    shutdown: Arc<AtomicBool>,
    events: Vec<Event>,

    /// Descriptor que se sacrifica para rechazar conexiones sin fds libres
    spare_fd: Option<File>,
}

impl Reactor {
    /// Crea el poller, registra el listener y lanza los workers
    pub(crate) fn new(
        listener: TcpListener,
        config: &Config,
        service: Arc<dyn Service>,
        metrics: Arc<ServerMetrics>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let poller = Poller::new(config.max_events).map_err(ServerError::Poller)?;

        let listen_fd = listener.as_raw_fd();
        let listen_mode = Mode {
            edge_triggered: config.edge_triggered,
            oneshot: false,
        };
        poller
            .register(listen_fd, listen_fd as u64, Interest::READABLE, listen_mode)
            .map_err(ServerError::Poller)?;

        let dispatch = if config.workers == 0 {
            Dispatch::Inline
        } else {
            let queue = BlockQueue::new(config.queue_capacity);
            metrics.watch_queue(queue.clone());
            let (tx, done) = crossbeam_channel::unbounded();
            let pool = WorkerPool::spawn(config.workers, queue.clone(), tx, poller.waker())?;
            Dispatch::Pooled { queue, pool, done }
        };

        Ok(Self {
            listener,
            listen_fd,
            poller,
            connections: HashMap::new(),
            context: ConnContext {
                service,
                metrics,
                edge_triggered: config.edge_triggered,
            },
            client_mode: Mode {
                edge_triggered: config.edge_triggered,
                oneshot: true,
            },
            max_connections: config.max_connections,
            dispatch,
            shutdown,
            events: Vec::with_capacity(config.max_events),
            spare_fd: Some(File::open("/dev/null")?),
        })
    }

    /// Handle para despertar el loop desde otro thread
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.poller.waker()
    }

    /// Loop principal: retorna cuando se pide el apagado
    pub(crate) fn run(mut self) -> Result<()> {
        info!(
            service = self.context.service.name(),
            edge_triggered = self.context.edge_triggered,
            workers = self.worker_count(),
            "reactor started"
        );

        let mut events = std::mem::take(&mut self.events);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poller.poll(&mut events, None) {
                error!(error = %e, "epoll_wait failed");
                self.teardown();
                return Err(ServerError::Poller(e));
            }

            for event in events.drain(..) {
                if event.token == self.listen_fd as u64 {
                    self.accept_all();
                } else {
                    self.on_client_event(event);
                }
            }

            self.collect_completions();
        }

        self.teardown();
        Ok(())
    }

    fn worker_count(&self) -> usize {
        match &self.dispatch {
            Dispatch::Inline => 0,
            Dispatch::Pooled { pool, .. } => pool.size(),
        }
    }

    /// Acepta hasta `WouldBlock`
    ///
    /// En edge-triggered una sola notificación puede cubrir varias
    /// conexiones pendientes; aceptar solo una dejaría las demás sin
    /// atender hasta la próxima conexión nueva.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.add_connection(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) if is_fd_exhaustion(&e) => {
                    if !self.shed_pending(&e) {
                        break;
                    }
                }
                Err(e) => {
                    // ENOMEM/ENOBUFS: se pierde este intento, no el loop
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Libera la reserva para aceptar y descartar una conexión pendiente
    ///
    /// Retorna `true` si se descartó una conexión y vale la pena seguir
    /// aceptando.
    fn shed_pending(&mut self, cause: &io::Error) -> bool {
        let spare = match self.spare_fd.take() {
            Some(spare) => spare,
            None => {
                warn!(error = %cause, "accept failed, no spare descriptor left");
                self.spare_fd = File::open("/dev/null").ok();
                return false;
            }
        };
        drop(spare);

        let shed = match self.listener.accept() {
            Ok((stream, peer)) => {
                warn!(peer = %peer, error = %cause, "out of descriptors, dropping connection");
                self.refuse(stream, peer);
                true
            }
            Err(e) => {
                warn!(error = %e, "accept with spare descriptor failed");
                false
            }
        };

        self.spare_fd = match File::open("/dev/null") {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, "failed to reopen spare descriptor");
                None
            }
        };

        shed
    }

    /// Respuesta best-effort de sobrecarga y cierre
    fn refuse(&self, stream: TcpStream, peer: SocketAddr) {
        if let Some(reply) = self.context.service.overloaded() {
            if let Err(e) = (&stream).write_all(&reply) {
                debug!(peer = %peer, error = %e, "overload reply not delivered");
            }
        }
        self.context.metrics.connection_refused();
    }

    fn add_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.connections.len() >= self.max_connections {
            warn!(peer = %peer, limit = self.max_connections, "connection table full, refusing");
            self.refuse(stream, peer);
            return;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!(peer = %peer, error = %e, "failed to set non-blocking");
            return;
        }

        let fd = stream.as_raw_fd();
        let conn = Connection::new(stream, fd, peer, self.context.clone());

        match self
            .poller
            .register(fd, fd as u64, Interest::READABLE, self.client_mode)
        {
            Ok(()) => {
                self.connections.insert(fd, Slot::Owned(conn));
                debug!(
                    fd,
                    peer = %peer,
                    live = self.context.metrics.live_connections(),
                    "connection accepted"
                );
            }
            // `conn` se cierra al soltarse
            Err(e) => warn!(fd, peer = %peer, error = %e, "failed to register connection"),
        }
    }

    fn on_client_event(&mut self, event: Event) {
        let fd = event.token as RawFd;

        let mut conn = match self.connections.remove(&fd) {
            Some(Slot::Owned(conn)) => conn,
            Some(Slot::Lent) => {
                // Un fd prestado está desarmado; no debería notificar
                self.connections.insert(fd, Slot::Lent);
                return;
            }
            None => {
                warn!(fd, "event for unknown fd");
                let _ = self.poller.deregister(fd);
                return;
            }
        };

        if event.error || event.hangup {
            // Con una respuesta a medias el error se obtiene del próximo write
            if conn.state() == ConnState::WritingResponse {
                self.drive(conn);
                return;
            }

            debug!(fd, error = event.error, hangup = event.hangup, "closing on hangup/error");
            self.close_connection(conn);
            return;
        }

        if event.readable {
            match conn.read() {
                ReadStatus::Drained(_) => {}
                ReadStatus::PeerClosed => {
                    if !conn.wants_process() {
                        self.close_connection(conn);
                        return;
                    }
                }
                ReadStatus::Failed(e) => {
                    warn!(fd, peer = %conn.peer_addr(), error = %e, "read failed");
                    self.close_connection(conn);
                    return;
                }
            }
        }

        self.drive(conn);
    }

    /// Avanza la conexión hasta que necesite esperar readiness o un worker
    fn drive(&mut self, mut conn: TcpConnection) {
        loop {
            match conn.state() {
                ConnState::WritingResponse => match conn.write() {
                    WriteStatus::Complete => continue,
                    WriteStatus::WouldBlock => {
                        self.rearm(conn, Interest::WRITABLE);
                        return;
                    }
                    WriteStatus::Failed(e) => {
                        warn!(fd = conn.fd(), peer = %conn.peer_addr(), error = %e, "write failed");
                        self.close_connection(conn);
                        return;
                    }
                },
                ConnState::Closing => {
                    self.close_connection(conn);
                    return;
                }
                _ if conn.wants_process() => {
                    if let Dispatch::Pooled { .. } = self.dispatch {
                        self.lend(conn);
                        return;
                    }
                    conn.process();
                }
                _ => {
                    if conn.is_peer_closed() {
                        self.close_connection(conn);
                    } else {
                        self.rearm(conn, Interest::READABLE);
                    }
                    return;
                }
            }
        }
    }

    /// Entrega la conexión a la cola de trabajo
    ///
    /// Bloquea si la cola está llena: el reactor deja de atender eventos
    /// hasta que un worker libere espacio.
    fn lend(&mut self, conn: TcpConnection) {
        let queue = match &self.dispatch {
            Dispatch::Pooled { queue, .. } => queue.clone(),
            Dispatch::Inline => return,
        };

        let fd = conn.fd();
        self.connections.insert(fd, Slot::Lent);

        if let Err(conn) = queue.push_back(conn) {
            // Cola cerrada: solo ocurre durante el apagado
            self.close_connection(conn);
        }
    }

    /// Recupera las conexiones que los workers terminaron de procesar
    fn collect_completions(&mut self) {
        let returned: Vec<TcpConnection> = match &self.dispatch {
            Dispatch::Pooled { done, .. } => done.try_iter().collect(),
            Dispatch::Inline => return,
        };

        for conn in returned {
            let fd = conn.fd();
            self.connections.remove(&fd);
            self.drive(conn);
        }
    }

    fn rearm(&mut self, conn: TcpConnection, interest: Interest) {
        let fd = conn.fd();

        match self
            .poller
            .reregister(fd, fd as u64, interest, self.client_mode)
        {
            Ok(()) => {
                self.connections.insert(fd, Slot::Owned(conn));
            }
            Err(e) => {
                warn!(fd, error = %e, "failed to rearm connection");
                self.close_connection(conn);
            }
        }
    }

    /// Saca el fd de epoll y de la tabla antes de cerrar el socket
    fn close_connection(&mut self, mut conn: TcpConnection) {
        let fd = conn.fd();

        self.connections.remove(&fd);
        if let Err(e) = self.poller.deregister(fd) {
            debug!(fd, error = %e, "deregister failed");
        }

        conn.close();
        // Al soltar `conn` se cierra el socket
    }

    /// Cierra la cola, espera a los workers y cierra todas las conexiones
    fn teardown(&mut self) {
        if let Dispatch::Pooled { queue, pool, done } =
            std::mem::replace(&mut self.dispatch, Dispatch::Inline)
        {
            let discarded = queue.close();
            pool.join();

            for mut conn in done.try_iter() {
                let _ = self.poller.deregister(conn.fd());
                conn.close();
            }

            if discarded > 0 {
                debug!(discarded, "pending connections discarded");
            }
        }

        for (fd, slot) in self.connections.drain() {
            let _ = self.poller.deregister(fd);
            if let Slot::Owned(mut conn) = slot {
                conn.close();
            }
        }

        let snapshot = self.context.metrics.snapshot();
        info!(metrics = %snapshot.to_json(), "reactor stopped");
    }
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}
