//! # Pool de Workers
//! src/server/worker.rs
//!
//! Threads fijos que consumen conexiones de la cola de trabajo:
//!
//! ```text
//! reactor ──push──▶ BlockQueue<Connection> ──pop──▶ worker: process()
//!    ▲                                                    │
//!    └──────── canal de retorno + waker ◀─────────────────┘
//! ```
//!
//! El worker es dueño exclusivo de la conexión mientras la procesa y la
//! devuelve por el canal; nunca toca el poller ni la tabla de fds.

use crate::connection::Connection;
use crate::error::{Result, ServerError};
use crate::server::poller::Waker;
use crate::sync::BlockQueue;
use crossbeam_channel::Sender;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Pool de tamaño fijo
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Lanza `size` workers sobre `queue`
    ///
    /// Cada conexión procesada vuelve por `done` y se despierta al reactor
    /// con `waker`.
    pub fn spawn<S>(
        size: usize,
        queue: BlockQueue<Connection<S>>,
        done: Sender<Connection<S>>,
        waker: Arc<Waker>,
    ) -> Result<Self>
    where
        S: Read + Write + Send + 'static,
    {
        let mut handles = Vec::with_capacity(size);

        for i in 0..size {
            let name = format!("worker-{}", i);
            let queue = queue.clone();
            let done = done.clone();
            let waker = Arc::clone(&waker);

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(queue, done, waker))
                .map_err(|source| ServerError::Spawn { name, source })?;

            handles.push(handle);
        }

        Ok(Self { handles })
    }

    /// Cantidad de workers
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Espera a que terminen todos los workers
    ///
    /// Solo retorna después de que alguien cierre la cola.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

/// Loop principal del worker
fn worker_loop<S: Read + Write>(
    queue: BlockQueue<Connection<S>>,
    done: Sender<Connection<S>>,
    waker: Arc<Waker>,
) {
    debug!("worker started");

    // `None` solo cuando la cola se cerró y quedó vacía
    while let Some(mut conn) = queue.pop() {
        conn.process();

        if done.send(conn).is_err() {
            // El reactor ya no existe; la conexión se cierra al soltarla
            break;
        }

        if let Err(e) = waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }

    debug!("worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{MockStream, ReadStep};
    use crate::connection::{ConnContext, ConnState};
    use crate::metrics::ServerMetrics;
    use crate::server::poller::Poller;
    use crate::service::{EchoService, Processed, Service};
    use crossbeam_channel::Receiver;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    /// Eco que espera una señal antes de responder cada request
    struct GatedService {
        gate: Receiver<()>,
    }

    impl Service for GatedService {
        fn process(&self, input: &[u8]) -> Processed {
            let _ = self.gate.recv();
            EchoService.process(input)
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn connection(fd: i32, payload: &[u8]) -> Connection<MockStream> {
        let context = ConnContext {
            service: Arc::new(EchoService),
            metrics: Arc::new(ServerMetrics::new()),
            edge_triggered: true,
        };
        connection_with(fd, payload, context)
    }

    fn connection_with(fd: i32, payload: &[u8], context: ConnContext) -> Connection<MockStream> {
        let mut stream = MockStream::default();
        stream.reads.push_back(ReadStep::Data(payload.to_vec()));

        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let mut conn = Connection::new(stream, fd, peer, context);
        conn.read();
        conn
    }

    #[test]
    fn test_workers_process_and_return_connections() {
        let poller = Poller::new(8).unwrap();
        let queue = BlockQueue::new(16);
        let (tx, rx) = crossbeam_channel::unbounded();

        let pool = WorkerPool::spawn(3, queue.clone(), tx, poller.waker()).unwrap();
        assert_eq!(pool.size(), 3);

        for fd in 0..10 {
            queue.push_back(connection(fd, b"hello")).unwrap();
        }

        let mut returned = Vec::new();
        for _ in 0..10 {
            let conn = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(conn.state(), ConnState::WritingResponse);
            assert_eq!(conn.to_write_bytes(), 5);
            returned.push(conn.fd());
        }

        returned.sort_unstable();
        assert_eq!(returned, (0..10).collect::<Vec<_>>());

        queue.close();
        pool.join();
    }

    #[test]
    fn test_close_stops_idle_workers() {
        let poller = Poller::new(8).unwrap();
        let queue: BlockQueue<Connection<MockStream>> = BlockQueue::new(4);
        let (tx, _rx) = crossbeam_channel::unbounded();

        let pool = WorkerPool::spawn(4, queue.clone(), tx, poller.waker()).unwrap();

        queue.close();
        // Si algún worker quedara bloqueado en pop, esto no terminaría
        pool.join();
    }

    #[test]
    fn test_queue_depth_visible_while_workers_busy() {
        let poller = Poller::new(8).unwrap();
        let queue = BlockQueue::new(16);
        let (tx, rx) = crossbeam_channel::unbounded();
        let (open_gate, gate) = crossbeam_channel::unbounded();

        let metrics = Arc::new(ServerMetrics::new());
        assert!(metrics.watch_queue(queue.clone()));
        let context = ConnContext {
            service: Arc::new(GatedService { gate }),
            metrics: Arc::clone(&metrics),
            edge_triggered: true,
        };

        let pool = WorkerPool::spawn(2, queue.clone(), tx, poller.waker()).unwrap();
        for fd in 0..6 {
            queue.push_back(connection_with(fd, b"x", context.clone())).unwrap();
        }

        // Los dos workers quedan bloqueados con una conexión cada uno
        let deadline = Instant::now() + Duration::from_secs(5);
        while metrics.queue_depth() != 4 {
            assert!(Instant::now() < deadline, "depth stuck at {}", metrics.queue_depth());
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(metrics.snapshot().queue_depth, 4);

        for _ in 0..6 {
            open_gate.send(()).unwrap();
        }
        for _ in 0..6 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(metrics.queue_depth(), 0);

        queue.close();
        pool.join();
    }
}
