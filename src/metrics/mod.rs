//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Contadores de observabilidad del servidor:
//! - Conexiones vivas (gauge atómico, nunca debe desviarse)
//! - Conexiones aceptadas / rechazadas / cerradas
//! - Requests procesados y su latencia de procesamiento (p50, p95, p99)
//! - Profundidad de la cola de trabajo (snapshot best-effort)

pub mod collector;

pub use collector::{MetricsSnapshot, QueueDepth, ServerMetrics};
