//! # Primitivas de Sincronización
//! src/sync/mod.rs
//!
//! Cola bloqueante acotada que comparten el reactor, el pool de workers
//! y el sink asíncrono de logs para pasarse trabajo entre threads.

pub mod block_queue;

pub use block_queue::BlockQueue;
