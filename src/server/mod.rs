//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Une las piezas en el orden en que dependen unas de otras:
//!
//! 1. Socket de escucha (`socket2`: reuse-address, backlog configurable)
//! 2. Servicio según el protocolo (`http` o `echo`)
//! 3. Reactor con su poller y, si `workers > 0`, el pool de workers
//!
//! `Server::bind` hace todo lo que puede fallar; `run` solo corre el loop.

pub mod poller;
pub mod reactor;
pub mod worker;

use crate::config::{Config, Protocol};
use crate::error::{Result, ServerError};
use crate::http::HttpService;
use crate::metrics::ServerMetrics;
use crate::service::{EchoService, Service};
use poller::Waker;
use reactor::Reactor;
use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Pide el apagado del servidor desde cualquier thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Marca el apagado y despierta al reactor
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    /// Verifica si ya se pidió el apagado
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Servidor listo para correr
pub struct Server {
    reactor: Reactor,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Crea el socket de escucha, el servicio y el reactor
    ///
    /// # Errores
    ///
    /// `InvalidAddress`, `Bind`, `Listen`, `Poller` o `Spawn`; ninguna
    /// conexión se acepta hasta `run`.
    pub fn bind(config: Config) -> Result<Self> {
        config.validate_limits()?;

        let addr = resolve(&config.address())?;
        let listener = listen(addr, config.backlog)?;
        let local_addr = listener.local_addr()?;

        let service: Arc<dyn Service> = match config.protocol {
            Protocol::Http => Arc::new(HttpService::new(&config.root)),
            Protocol::Echo => Arc::new(EchoService),
        };

        let metrics = Arc::new(ServerMetrics::new());
        let flag = Arc::new(AtomicBool::new(false));
        let reactor = Reactor::new(
            listener,
            &config,
            service,
            Arc::clone(&metrics),
            Arc::clone(&flag),
        )?;

        let shutdown = ShutdownHandle {
            flag,
            waker: reactor.waker(),
        };

        info!(
            addr = %local_addr,
            protocol = ?config.protocol,
            root = %config.root.display(),
            "listening"
        );

        Ok(Self {
            reactor,
            local_addr,
            shutdown,
            metrics,
        })
    }

    /// Dirección real de escucha (útil con puerto 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle para apagar el servidor desde otro thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Métricas compartidas con el reactor y las conexiones
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Corre el loop de eventos hasta `ShutdownHandle::shutdown`
    pub fn run(self) -> Result<()> {
        self.reactor.run()
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServerError::InvalidAddress(address.to_string()))
}

/// Socket de escucha no bloqueante
fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source| ServerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SocketProtocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .listen(backlog)
        .map_err(|source| ServerError::Listen { addr, source })?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
