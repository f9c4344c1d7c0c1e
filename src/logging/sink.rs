//! # Sink Asíncrono de Logs
//! src/logging/sink.rs
//!
//! Un único thread consume `LogRecord`s de una `BlockQueue` y los escribe
//! en un archivo o en stderr. Quien loguea solo paga el push a la cola;
//! el disco lo paga este thread.
//!
//! El thread usa `pop_timeout` para notar el cierre de la cola aunque no
//! lleguen más registros.

use super::record::LogRecord;
use super::LogConfig;
use crate::error::{Result, ServerError};
use crate::sync::BlockQueue;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cada cuánto el sink revisa si la cola se cerró
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tiempo máximo que `shutdown` espera a que el sink vacíe la cola
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Máximo de registros escritos entre dos flush
const MAX_BATCH: usize = 256;

/// Thread de escritura de logs
#[derive(Debug)]
pub struct AsyncLog {
    queue: BlockQueue<LogRecord>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncLog {
    /// Abre el destino configurado y lanza el thread
    pub fn start(config: &LogConfig) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match &config.file {
            Some(path) => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
            None => Box::new(io::stderr()),
        };

        Self::with_writer(writer, config.queue_capacity)
    }

    /// Lanza el thread sobre un writer arbitrario
    pub fn with_writer(writer: Box<dyn Write + Send>, capacity: usize) -> Result<Self> {
        let queue = BlockQueue::new(capacity);
        let consumer = queue.clone();

        let handle = thread::Builder::new()
            .name("log-sink".to_string())
            .spawn(move || sink_loop(consumer, writer))
            .map_err(|source| ServerError::Spawn {
                name: "log-sink".to_string(),
                source,
            })?;

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Handle de productor (para la capa de tracing u otros threads)
    pub fn queue(&self) -> BlockQueue<LogRecord> {
        self.queue.clone()
    }

    /// Encola un registro; se descarta si el sink ya cerró
    pub fn log(&self, record: LogRecord) {
        let _ = self.queue.push_back(record);
    }

    /// Vacía lo pendiente, cierra la cola y espera al thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };

        // close() descarta lo pendiente: primero dejar que el sink lo escriba
        self.queue.flush();
        if !self.queue.wait_drained(DRAIN_TIMEOUT) {
            eprintln!("log sink did not drain in {:?}, dropping records", DRAIN_TIMEOUT);
        }

        self.queue.close();
        let _ = handle.join();
    }
}

impl Drop for AsyncLog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sink_loop(queue: BlockQueue<LogRecord>, mut writer: Box<dyn Write + Send>) {
    loop {
        match queue.pop_timeout(POLL_INTERVAL) {
            Some(first) => {
                let _ = writeln!(writer, "{}", first.format());

                // Escribir en lote lo que ya esté disponible
                for _ in 1..MAX_BATCH {
                    match queue.pop_timeout(Duration::ZERO) {
                        Some(record) => {
                            let _ = writeln!(writer, "{}", record.format());
                        }
                        None => break,
                    }
                }

                let _ = writer.flush();
            }
            None if queue.is_closed() => break,
            None => {}
        }
    }

    let _ = writer.flush();
}
