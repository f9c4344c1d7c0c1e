//! # Epoll Webserver - Entry Point
//! src/main.rs
//!
//! Lee la configuración, inicia el logging y corre el servidor hasta
//! recibir SIGINT/SIGTERM. Una segunda señal termina el proceso sin
//! esperar.

use epoll_webserver::config::Config;
use epoll_webserver::error::Result;
use epoll_webserver::logging;
use epoll_webserver::server::Server;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, warn};

fn main() {
    let config = Config::new();

    if let Err(e) = config.validate() {
        eprintln!("configuración inválida: {}", e);
        std::process::exit(2);
    }

    let log = match logging::init(&config.log_config()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("no se pudo iniciar el logging: {}", e);
            std::process::exit(1);
        }
    };

    let result = run(config);
    if let Err(e) = &result {
        error!(error = %e, "server failed");
    }

    // Escribe lo pendiente antes de salir
    log.shutdown();

    if let Err(e) = result {
        eprintln!("error fatal: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<()> {
    config.log_summary();

    let server = Server::bind(config)?;
    let handle = server.shutdown_handle();
    let signals = AtomicUsize::new(0);

    ctrlc::set_handler(move || {
        if signals.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("shutdown signal received");
            handle.shutdown();
        } else {
            warn!("second signal, exiting immediately");
            std::process::exit(130);
        }
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    server.run()?;
    info!("server stopped");
    Ok(())
}
