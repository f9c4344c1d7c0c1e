//! Tests de integración del servidor
//! tests/integration_test.rs
//!
//! Cada test levanta su propio servidor en `127.0.0.1:0` dentro de un
//! thread y habla con él usando `TcpStream` bloqueante.

use epoll_webserver::config::{Config, Protocol};
use epoll_webserver::metrics::ServerMetrics;
use epoll_webserver::server::{Server, ShutdownHandle};
use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Servidor corriendo en un thread de fondo
struct Running {
    addr: SocketAddr,
    handle: ShutdownHandle,
    metrics: Arc<ServerMetrics>,
    thread: JoinHandle<()>,
}

impl Running {
    fn start(config: Config) -> Self {
        let server = Server::bind(config).expect("bind failed");
        Self::spawn(server)
    }

    fn spawn(server: Server) -> Self {
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let metrics = server.metrics();
        let thread = thread::spawn(move || server.run().expect("server failed"));

        Self {
            addr,
            handle,
            metrics,
            thread,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect failed");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(TIMEOUT)).unwrap();
        stream
    }

    fn wait_live(&self, expected: usize) {
        let deadline = Instant::now() + TIMEOUT;
        while self.metrics.live_connections() != expected {
            assert!(
                Instant::now() < deadline,
                "expected {} live connections, got {}",
                expected,
                self.metrics.live_connections()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn stop(self) -> Arc<ServerMetrics> {
        self.handle.shutdown();
        self.thread.join().expect("server thread panicked");
        self.metrics
    }
}

fn config(protocol: Protocol, workers: usize, edge_triggered: bool, root: &Path) -> Config {
    Config {
        port: 0,
        backlog: 128,
        protocol,
        workers,
        edge_triggered,
        root: root.to_path_buf(),
        ..Config::default()
    }
}

/// Lee una respuesta HTTP completa usando `Content-Length`
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];

    while !raw.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("read head");
        assert!(n > 0, "connection closed inside the head");
        raw.push(byte[0]);
    }

    let head = String::from_utf8(raw).unwrap();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).expect("read body");
    (head, body)
}

fn get(running: &Running, path: &str) -> (String, Vec<u8>) {
    let mut stream = running.connect();
    write!(stream, "GET {} HTTP/1.0\r\n\r\n", path).unwrap();
    read_response(&mut stream)
}

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("style.css"), "body { color: red; }").unwrap();
    dir
}

fn echo_round_trip(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).unwrap();

    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, payload);
}

#[test]
fn test_accepts_whole_backlog() {
    let dir = site();
    let server = Server::bind(config(Protocol::Echo, 2, true, dir.path())).unwrap();
    let addr = server.local_addr();

    // Conexiones completadas por el kernel antes de que corra el reactor
    let clients: Vec<TcpStream> = (0..20).map(|_| TcpStream::connect(addr).unwrap()).collect();

    let running = Running::spawn(server);
    running.wait_live(20);

    drop(clients);
    running.wait_live(0);
    running.stop();
}

#[test]
fn test_echo_pooled() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 4, true, dir.path()));

    let mut stream = running.connect();
    echo_round_trip(&mut stream, b"hello");
    echo_round_trip(&mut stream, b"second message on the same connection");

    let metrics = running.stop();
    assert!(metrics.requests_total() >= 2);
    assert_eq!(metrics.live_connections(), 0);
}

#[test]
fn test_echo_inline_level_triggered() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 0, false, dir.path()));

    let mut stream = running.connect();
    // Más de lo que entra en una sola lectura
    let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();

    // Escribir y leer a la vez; si no, ambos lados pueden llenar sus buffers
    let mut writer = stream.try_clone().unwrap();
    let sent = payload.clone();
    let writer = thread::spawn(move || writer.write_all(&sent).unwrap());

    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).unwrap();
    writer.join().unwrap();
    assert!(echoed == payload, "echo differs from payload");

    running.stop();
}

#[test]
fn test_many_clients_in_parallel() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 4, true, dir.path()));
    let addr = running.addr;

    let clients: Vec<_> = (0..16)
        .map(|i| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(TIMEOUT)).unwrap();
                for round in 0..10 {
                    let payload = format!("client {} round {}", i, round);
                    echo_round_trip(&mut stream, payload.as_bytes());
                }
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    running.wait_live(0);
    let metrics = running.stop();
    assert!(metrics.requests_total() >= 160);
}

#[test]
fn test_reset_connection_does_not_affect_others() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 2, true, dir.path()));

    let mut healthy = running.connect();
    let broken = running.connect();
    running.wait_live(2);

    // SO_LINGER 0: el cierre manda RST en vez de FIN
    let socket = socket2::Socket::from(broken);
    socket.set_linger(Some(Duration::ZERO)).unwrap();
    drop(socket);

    running.wait_live(1);
    echo_round_trip(&mut healthy, b"still here");

    running.stop();
}

#[test]
fn test_reset_during_large_response_does_not_affect_others() {
    let dir = site();
    let content = vec![b'z'; 16 * 1024 * 1024];
    fs::write(dir.path().join("big.bin"), &content).unwrap();

    let running = Running::start(config(Protocol::Http, 2, true, dir.path()));

    let mut healthy = running.connect();
    let mut stalled = running.connect();
    stalled
        .write_all(b"GET /big.bin HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();

    // Leer solo el inicio: el servidor queda esperando EPOLLOUT
    let mut start = [0u8; 15];
    stalled.read_exact(&mut start).unwrap();
    assert_eq!(&start, b"HTTP/1.1 200 OK");
    thread::sleep(Duration::from_millis(200));

    let socket = socket2::Socket::from(stalled);
    socket.set_linger(Some(Duration::ZERO)).unwrap();
    drop(socket);

    running.wait_live(1);

    healthy
        .write_all(b"GET /style.css HTTP/1.1\r\nHost: a\r\n\r\n")
        .unwrap();
    let (head, body) = read_response(&mut healthy);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{}", head);
    assert_eq!(body, b"body { color: red; }");

    let metrics = running.stop();
    assert_eq!(metrics.live_connections(), 0);
}

#[test]
fn test_half_close_still_answered() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 2, true, dir.path()));

    let mut stream = running.connect();
    stream.write_all(b"last words").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed, b"last words");

    running.wait_live(0);
    running.stop();
}

#[test]
fn test_static_index_and_mime() {
    let dir = site();
    let running = Running::start(config(Protocol::Http, 2, true, dir.path()));

    let (head, body) = get(&running, "/");
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{}", head);
    assert!(head.contains("Content-Type: text/html"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, b"<h1>home</h1>");

    let (head, body) = get(&running, "/style.css");
    assert!(head.contains("Content-Type: text/css"));
    assert_eq!(body, b"body { color: red; }");

    running.stop();
}

#[test]
fn test_large_file_is_sent_completely() {
    let dir = site();
    let content: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i * 7 % 256) as u8).collect();
    fs::write(dir.path().join("big.bin"), &content).unwrap();

    let running = Running::start(config(Protocol::Http, 2, true, dir.path()));

    let mut stream = running.connect();
    stream.write_all(b"GET /big.bin HTTP/1.0\r\n\r\n").unwrap();

    // Leer despacio para forzar escrituras parciales del lado del servidor
    thread::sleep(Duration::from_millis(100));
    let (head, body) = read_response(&mut stream);

    assert!(head.contains(&format!("Content-Length: {}\r\n", content.len())));
    assert!(body == content, "body differs from file");

    running.stop();
}

#[test]
fn test_keep_alive_reuses_connection() {
    let dir = site();
    let running = Running::start(config(Protocol::Http, 2, true, dir.path()));

    let mut stream = running.connect();
    for _ in 0..3 {
        stream
            .write_all(b"GET /style.css HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let (head, body) = read_response(&mut stream);
        assert!(head.contains("Connection: keep-alive"));
        assert_eq!(body, b"body { color: red; }");
    }

    assert_eq!(running.metrics.live_connections(), 1);
    running.stop();
}

#[test]
fn test_pipelined_requests_in_one_write() {
    let dir = site();
    let running = Running::start(config(Protocol::Http, 0, true, dir.path()));

    let mut stream = running.connect();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: a\r\n\r\nGET /style.css HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
        )
        .unwrap();

    let (_, first) = read_response(&mut stream);
    let (head, second) = read_response(&mut stream);
    assert_eq!(first, b"<h1>home</h1>");
    assert_eq!(second, b"body { color: red; }");
    assert!(head.contains("Connection: close"));

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    running.stop();
}

#[test]
fn test_error_statuses() {
    let dir = site();
    let running = Running::start(config(Protocol::Http, 2, true, dir.path()));

    let (head, _) = get(&running, "/missing.html");
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", head);

    let (head, _) = get(&running, "/../etc/passwd");
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{}", head);

    let mut stream = running.connect();
    stream.write_all(b"BROKEN\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", head);

    running.stop();
}

#[test]
fn test_connection_limit_refuses_with_503() {
    let dir = site();
    let mut cfg = config(Protocol::Http, 2, true, dir.path());
    cfg.max_connections = 2;
    let running = Running::start(cfg);

    let _a = running.connect();
    let _b = running.connect();
    running.wait_live(2);

    let mut refused = running.connect();
    let mut response = Vec::new();
    refused.read_to_end(&mut response).unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{}", text);

    assert_eq!(running.metrics.live_connections(), 2);
    running.stop();
}

#[test]
fn test_shutdown_closes_open_connections() {
    let dir = site();
    let running = Running::start(config(Protocol::Echo, 3, true, dir.path()));

    let mut clients: Vec<TcpStream> = (0..5).map(|_| running.connect()).collect();
    running.wait_live(5);

    let metrics = running.stop();
    assert_eq!(metrics.live_connections(), 0);

    // El servidor cerró su extremo
    let mut buf = [0u8; 1];
    for client in clients.iter_mut() {
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }
}
