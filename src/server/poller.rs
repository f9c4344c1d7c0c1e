//! # Poller epoll
//! src/server/poller.rs
//!
//! Envoltura mínima sobre `epoll(7)`:
//!
//! - Registrar descriptores con interés de lectura/escritura, en modo
//!   edge-triggered o level-triggered y opcionalmente `EPOLLONESHOT`
//! - Bloquear hasta que haya eventos (con timeout opcional)
//! - Despertar el `epoll_wait` desde otro thread con un `eventfd`
//!
//! El token de cada registro es el propio descriptor; `WAKE_TOKEN` queda
//! reservado para el `eventfd` y nunca llega a quien llama a `poll`.

use libc::{
    epoll_event, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLL_CLOEXEC,
    EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

/// Token reservado para el evento de despertar
const WAKE_TOKEN: u64 = u64::MAX;

/// Intereses de un registro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// Modo de notificación
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// `EPOLLET`: una notificación por transición, hay que drenar el socket
    pub edge_triggered: bool,

    /// `EPOLLONESHOT`: tras un evento el registro queda desarmado hasta
    /// el próximo `reregister`
    pub oneshot: bool,
}

/// Evento de readiness entregado por `poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,

    /// `EPOLLHUP`: ambos lados cerrados
    pub hangup: bool,

    /// `EPOLLERR`
    pub error: bool,
}

impl Event {
    fn from_raw(token: u64, flags: u32) -> Self {
        Self {
            token,
            readable: flags & EPOLLIN as u32 != 0,
            writable: flags & EPOLLOUT as u32 != 0,
            hangup: flags & EPOLLHUP as u32 != 0,
            error: flags & EPOLLERR as u32 != 0,
        }
    }
}

/// Despierta un `epoll_wait` bloqueado desde cualquier thread
#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Suma 1 al contador del `eventfd`
    ///
    /// Si el contador está saturado (`EAGAIN`) ya hay un despertar
    /// pendiente, así que no es un error.
    pub fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &buf as *const u64 as *const libc::c_void,
                8,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Reinicia el contador (una lectura lo deja en cero)
    fn drain(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                8,
            );
        }
    }
}

/// Instancia de epoll con su buffer de eventos
pub struct Poller {
    epoll: OwnedFd,

    /// Buffer reutilizable; su largo es el máximo de eventos por `poll`
    events: Vec<epoll_event>,

    waker: Arc<Waker>,
}

impl Poller {
    /// Crea la instancia de epoll y registra el `eventfd` de despertar
    pub fn new(max_events: usize) -> io::Result<Self> {
        let epoll = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let waker = Waker::new()?;
        ctl(
            epoll.as_raw_fd(),
            EPOLL_CTL_ADD,
            waker.fd.as_raw_fd(),
            EPOLLIN as u32,
            WAKE_TOKEN,
        )?;

        Ok(Self {
            epoll,
            events: vec![epoll_event { events: 0, u64: 0 }; max_events.max(1)],
            waker: Arc::new(waker),
        })
    }

    /// Handle para despertar este poller
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Registra un descriptor
    pub fn register(&self, fd: RawFd, token: u64, interest: Interest, mode: Mode) -> io::Result<()> {
        ctl(self.epoll.as_raw_fd(), EPOLL_CTL_ADD, fd, flags(interest, mode), token)
    }

    /// Cambia los intereses de un descriptor ya registrado (y lo rearma
    /// si es oneshot)
    pub fn reregister(&self, fd: RawFd, token: u64, interest: Interest, mode: Mode) -> io::Result<()> {
        ctl(self.epoll.as_raw_fd(), EPOLL_CTL_MOD, fd, flags(interest, mode), token)
    }

    /// Quita un descriptor del poller
    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Espera eventos y los deja en `events` (que se limpia antes)
    ///
    /// Retorna sin eventos si venció el timeout, si lo interrumpió una
    /// señal o si solo hubo un despertar.
    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for raw in &self.events[..n as usize] {
            let token = raw.u64;
            let flags = raw.events;

            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            events.push(Event::from_raw(token, flags));
        }

        Ok(())
    }
}

fn flags(interest: Interest, mode: Mode) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }
    if mode.edge_triggered {
        flags |= EPOLLET;
    }
    if mode.oneshot {
        flags |= EPOLLONESHOT;
    }

    flags as u32
}

fn ctl(epoll: RawFd, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
    let mut event = epoll_event { events, u64: token };

    let rc = unsafe { libc::epoll_ctl(epoll, op, fd, &mut event) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Instant;

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    fn mode(edge_triggered: bool, oneshot: bool) -> Mode {
        Mode {
            edge_triggered,
            oneshot,
        }
    }

    #[test]
    fn test_readable_event_carries_token() {
        let mut poller = Poller::new(16).unwrap();
        let (a, mut b) = pair();
        poller
            .register(a.as_raw_fd(), 42, Interest::READABLE, mode(false, false))
            .unwrap();

        b.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 42);
        assert!(events[0].readable);
        assert!(!events[0].writable);
    }

    #[test]
    fn test_edge_triggered_fires_once_per_transition() {
        let mut poller = Poller::new(16).unwrap();
        let (a, mut b) = pair();
        poller
            .register(a.as_raw_fd(), 1, Interest::READABLE, mode(true, false))
            .unwrap();

        b.write_all(b"data").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, SHORT).unwrap();
        assert_eq!(events.len(), 1);

        // Sin leer: en edge-triggered no hay nueva notificación
        poller.poll(&mut events, SHORT).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_level_triggered_repeats_until_drained() {
        let mut poller = Poller::new(16).unwrap();
        let (mut a, mut b) = pair();
        poller
            .register(a.as_raw_fd(), 1, Interest::READABLE, mode(false, false))
            .unwrap();

        b.write_all(b"data").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, SHORT).unwrap();
        assert_eq!(events.len(), 1);
        poller.poll(&mut events, SHORT).unwrap();
        assert_eq!(events.len(), 1);

        let mut buf = [0u8; 16];
        assert_eq!(a.read(&mut buf).unwrap(), 4);
        poller.poll(&mut events, SHORT).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_oneshot_needs_rearm() {
        let mut poller = Poller::new(16).unwrap();
        let (a, mut b) = pair();
        poller
            .register(a.as_raw_fd(), 5, Interest::READABLE, mode(false, true))
            .unwrap();

        b.write_all(b"x").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, SHORT).unwrap();
        assert_eq!(events.len(), 1);

        // Desarmado: aunque siga legible no hay evento
        poller.poll(&mut events, SHORT).unwrap();
        assert!(events.is_empty());

        poller
            .reregister(a.as_raw_fd(), 5, Interest::READABLE, mode(false, true))
            .unwrap();
        poller.poll(&mut events, SHORT).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_hangup_reported_when_peer_closes() {
        let mut poller = Poller::new(16).unwrap();
        let (a, b) = pair();
        poller
            .register(a.as_raw_fd(), 3, Interest::READABLE, mode(true, false))
            .unwrap();

        drop(b);

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readable);
    }

    #[test]
    fn test_deregister_stops_events() {
        let mut poller = Poller::new(16).unwrap();
        let (a, mut b) = pair();
        poller
            .register(a.as_raw_fd(), 9, Interest::READABLE, mode(false, false))
            .unwrap();
        poller.deregister(a.as_raw_fd()).unwrap();

        b.write_all(b"ignored").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, SHORT).unwrap();
        assert!(events.is_empty());

        assert!(poller.deregister(a.as_raw_fd()).is_err());
    }

    #[test]
    fn test_waker_interrupts_poll() {
        let mut poller = Poller::new(16).unwrap();
        let waker = poller.waker();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.wake().unwrap();
        });

        let started = Instant::now();
        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::from_secs(10))).unwrap();

        assert!(events.is_empty(), "wake events are not reported");
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();

        // El contador quedó drenado: el siguiente poll espera el timeout
        poller.poll(&mut events, SHORT).unwrap();
        assert!(events.is_empty());
    }
}
