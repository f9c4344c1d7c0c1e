//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Contadores compartidos entre el reactor y los workers. Los contadores
//! son atómicos; solo la ventana de latencias usa un `Mutex`.
//!
//! La profundidad de la cola de trabajo no se cuenta aparte: se lee de la
//! cola misma (`watch_queue`) en cada snapshot.

use crate::sync::BlockQueue;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Máximo de latencias a guardar (para calcular percentiles)
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Algo cuya profundidad se puede observar mientras otros lo usan
pub trait QueueDepth: Send + Sync + fmt::Debug {
    fn depth(&self) -> usize;
}

impl<T: Send> QueueDepth for BlockQueue<T> {
    fn depth(&self) -> usize {
        self.len()
    }
}

/// Métricas del servidor, thread-safe
#[derive(Debug)]
pub struct ServerMetrics {
    /// Conexiones abiertas en este instante
    live_connections: AtomicUsize,

    /// Total de conexiones aceptadas
    accepted_total: AtomicU64,

    /// Total de conexiones cerradas
    closed_total: AtomicU64,

    /// Conexiones rechazadas (tabla de fds llena)
    refused_total: AtomicU64,

    /// Requests con respuesta generada
    requests_total: AtomicU64,

    /// Latencias de procesamiento (microsegundos), ventana deslizante
    latencies: Mutex<Vec<u64>>,

    /// Cola de trabajo observada (solo con workers)
    work_queue: OnceLock<Box<dyn QueueDepth>>,

    start_time: Instant,
}

impl ServerMetrics {
    /// Crea métricas en cero
    pub fn new() -> Self {
        Self {
            live_connections: AtomicUsize::new(0),
            accepted_total: AtomicU64::new(0),
            closed_total: AtomicU64::new(0),
            refused_total: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            latencies: Mutex::new(Vec::with_capacity(1024)),
            work_queue: OnceLock::new(),
            start_time: Instant::now(),
        }
    }

    /// Registra una conexión aceptada
    pub fn connection_opened(&self) {
        self.live_connections.fetch_add(1, Ordering::AcqRel);
        self.accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Registra el cierre de una conexión
    ///
    /// La conexión garantiza que esto se llama una sola vez por cada
    /// `connection_opened`.
    pub fn connection_closed(&self) {
        self.live_connections.fetch_sub(1, Ordering::AcqRel);
        self.closed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Registra una conexión rechazada antes de crearse
    pub fn connection_refused(&self) {
        self.refused_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Registra un request procesado
    pub fn record_request(&self, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let latency_us = latency.as_micros() as u64;
        let mut latencies = self.latencies.lock().unwrap();

        // Si tenemos demasiadas latencias, eliminar las más antiguas
        if latencies.len() >= MAX_LATENCY_SAMPLES {
            latencies.remove(0);
        }
        latencies.push(latency_us);
    }

    /// Conexiones vivas en este instante
    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::Acquire)
    }

    /// Total de requests procesados
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Observa `queue` para reportar su profundidad
    ///
    /// Solo la primera cola queda registrada; retorna `false` si ya había una.
    pub fn watch_queue(&self, queue: impl QueueDepth + 'static) -> bool {
        self.work_queue.set(Box::new(queue)).is_ok()
    }

    /// Elementos en la cola de trabajo en este instante (0 sin workers)
    pub fn queue_depth(&self) -> usize {
        self.work_queue.get().map_or(0, |queue| queue.depth())
    }

    /// Obtiene un snapshot de las métricas
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = self.latencies.lock().unwrap();
            calculate_percentiles(&latencies)
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            live_connections: self.live_connections(),
            accepted_total: self.accepted_total.load(Ordering::Relaxed),
            closed_total: self.closed_total.load(Ordering::Relaxed),
            refused_total: self.refused_total.load(Ordering::Relaxed),
            requests_total: self.requests_total(),
            queue_depth: self.queue_depth(),
            latency_p50_us: p50,
            latency_p95_us: p95,
            latency_p99_us: p99,
            latency_avg_us: avg,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Calcula percentiles de latencia
fn calculate_percentiles(latencies: &[u64]) -> (u64, u64, u64, u64) {
    if latencies.is_empty() {
        return (0, 0, 0, 0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let len = sorted.len();
    let p50 = sorted[len * 50 / 100];
    let p95 = sorted[len * 95 / 100];
    let p99 = sorted[len * 99 / 100];

    let sum: u64 = sorted.iter().sum();
    let avg = sum / len as u64;

    (p50, p95, p99, avg)
}

/// Snapshot de métricas (para logs y uso externo)
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub live_connections: usize,
    pub accepted_total: u64,
    pub closed_total: u64,
    pub refused_total: u64,
    pub requests_total: u64,
    pub queue_depth: usize,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
}

impl MetricsSnapshot {
    /// Serializa el snapshot como JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
