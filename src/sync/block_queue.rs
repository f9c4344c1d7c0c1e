//! # Cola Bloqueante Acotada
//! src/sync/block_queue.rs
//!
//! Cola doble (deque) thread-safe con capacidad fija:
//! - Los productores se bloquean mientras la cola está llena
//! - Los consumidores se bloquean mientras la cola está vacía
//! - `close()` descarta lo pendiente y despierta a todos
//!
//! Un único `Mutex` protege el deque; tres `Condvar` (no-llena, no-vacía,
//! vaciada) evitan el busy polling.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Estado protegido por el mutex
struct QueueState<T> {
    /// Elementos pendientes en orden FIFO
    deque: VecDeque<T>,

    /// Una vez cerrada, la cola no vuelve a abrirse
    closed: bool,
}

/// Cola bloqueante acotada
///
/// Clonar la cola produce otro handle sobre la misma cola (igual que
/// un `Arc`), así productores y consumidores pueden vivir en threads distintos.
pub struct BlockQueue<T> {
    /// Deque + flag de cierre
    state: Arc<Mutex<QueueState<T>>>,

    /// Consumidores esperando a que haya elementos
    not_empty: Arc<Condvar>,

    /// Productores esperando a que haya espacio
    not_full: Arc<Condvar>,

    /// Quienes esperan a que los consumidores vacíen la cola
    drained: Arc<Condvar>,

    /// Capacidad máxima (fija desde la construcción)
    capacity: usize,
}

impl<T> BlockQueue<T> {
    /// Crea una nueva cola con capacidad máxima
    ///
    /// # Panics
    ///
    /// Si `capacity` es 0: una cola de capacidad cero bloquearía
    /// a cualquier productor para siempre.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BlockQueue capacity must be > 0");

        Self {
            state: Arc::new(Mutex::new(QueueState {
                deque: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            })),
            not_empty: Arc::new(Condvar::new()),
            not_full: Arc::new(Condvar::new()),
            drained: Arc::new(Condvar::new()),
            capacity,
        }
    }

    /// Encola al final, bloqueando mientras la cola esté llena
    ///
    /// Retorna `Err(item)` si la cola está (o queda) cerrada; el elemento
    /// se devuelve intacto al llamador.
    pub fn push_back(&self, item: T) -> Result<(), T> {
        self.push_with(item, |deque, item| deque.push_back(item))
    }

    /// Encola al frente (re-inserción prioritaria)
    ///
    /// Mismas reglas de bloqueo y cierre que `push_back`.
    pub fn push_front(&self, item: T) -> Result<(), T> {
        self.push_with(item, |deque, item| deque.push_front(item))
    }

    fn push_with(&self, item: T, insert: impl FnOnce(&mut VecDeque<T>, T)) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();

        while state.deque.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }

        if state.closed {
            return Err(item);
        }

        insert(&mut state.deque, item);
        self.not_empty.notify_one();

        Ok(())
    }

    /// Desencola el primer elemento, bloqueando mientras la cola esté vacía
    ///
    /// Retorna `None` cuando la cola está cerrada y vacía.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.deque.pop_front() {
                self.taken(&state);
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Como `pop`, pero esperando como máximo `timeout`
    ///
    /// Retorna `None` si vence el plazo o si la cola se cierra sin
    /// elementos. El flag de cierre se revisa después de cada despertar,
    /// incluidos los despertares espurios.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.deque.pop_front() {
                self.taken(&state);
                return Some(item);
            }

            if state.closed {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let (guard, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    fn taken(&self, state: &QueueState<T>) {
        self.not_full.notify_one();
        if state.deque.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Espera hasta que la cola quede vacía o venza `timeout`
    ///
    /// Retorna `true` si la cola quedó vacía (o cerrada). No impide que
    /// otros productores sigan encolando después.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        loop {
            if state.deque.is_empty() || state.closed {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let (guard, _) = self
                .drained
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// Cierra la cola
    ///
    /// Descarta los elementos pendientes (no se entregan), marca la cola
    /// como cerrada y despierta a todos los productores y consumidores.
    /// Retorna cuántos elementos se descartaron.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            std::mem::take(&mut state.deque)
        };

        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.drained.notify_all();

        // Los elementos se destruyen fuera del lock
        discarded.len()
    }

    /// Despierta a un consumidor sin insertar nada
    ///
    /// Sirve para que un consumidor en `pop_timeout` revise antes
    /// su condición de salida.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    /// Vacía la cola sin cerrarla
    pub fn clear(&self) {
        let drained = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.deque)
        };
        self.not_full.notify_all();
        self.drained.notify_all();
        drop(drained);
    }

    // === Snapshots (no usar para decisiones de control) ===

    /// Número de elementos en este instante
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().deque.len()
    }

    /// Verifica si la cola está vacía
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verifica si la cola está llena
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Verifica si la cola ya fue cerrada
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Retorna la capacidad máxima
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BlockQueue<T> {
    /// Copia del primer elemento, sin removerlo
    pub fn front(&self) -> Option<T> {
        self.state.lock().unwrap().deque.front().cloned()
    }

    /// Copia del último elemento, sin removerlo
    pub fn back(&self) -> Option<T> {
        self.state.lock().unwrap().deque.back().cloned()
    }
}

impl<T> Clone for BlockQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            not_empty: Arc::clone(&self.not_empty),
            not_full: Arc::clone(&self.not_full),
            drained: Arc::clone(&self.drained),
            capacity: self.capacity,
        }
    }
}

impl<T> std::fmt::Debug for BlockQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
