//! Entry point for the CAN control server.
//!
//! Reads the `key=value` config file named on the command line, binds a TCP
//! listener, runs interface discovery once, installs a graceful shutdown
//! handler for `SIGINT`/`SIGTERM`, and then runs the accept loop on the
//! calling thread until shutdown is requested.

mod config;

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use socket2::{Domain, Socket, Type};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;

use canctl_kernel::{InterfaceRegistry, ThreadRegistry, WorkerPool};
use canctl_net::{LogController, SharedState};

use crate::config::Config;

/// Multi-client CAN-bus scheduling control server.
#[derive(Parser, Debug)]
#[command(name = "canctl-server", version, about)]
struct Cli {
    /// Path to the `key=value` configuration file (PORT, LOG_LEVEL, WORKER_THREADS).
    config_file: std::path::PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config_file)
        .with_context(|| format!("loading configuration from {}", cli.config_file.display()))?;

    let log_controller = LogController::new(config.log_level);
    init_tracing(&log_controller);

    tracing::info!(port = config.port, worker_threads = config.worker_threads, "starting canctl-server");

    let listener = bind_listener(config.port).context("failed to bind listener")?;

    let thread_registry = Arc::new(ThreadRegistry::new());
    let interfaces = Arc::new(InterfaceRegistry::new());
    interfaces.refresh();

    let pool = WorkerPool::new(config.worker_threads, Arc::clone(&thread_registry));

    let shared = Arc::new(SharedState {
        pool,
        thread_registry: Arc::clone(&thread_registry),
        interfaces,
        log_controller,
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown)).context("failed to install signal handlers")?;

    let accept_id = thread_registry.add("accept loop");
    tracing::info!("server: waiting for connections...");
    canctl_net::server::run(listener, shared, shutdown);
    thread_registry.remove(accept_id);

    tracing::info!("canctl-server shut down cleanly");
    Ok(())
}

const LISTEN_BACKLOG: i32 = 10;

/// Bind a dual-stack-capable listener on `port` with `SO_REUSEADDR` set
/// (matching the reference server's explicit `setsockopt` call) and a
/// backlog of 10. Tries IPv4 `0.0.0.0` first, matching the reference
/// server's `getaddrinfo` with `AI_PASSIVE`/`AF_UNSPEC` behavior (the first
/// bindable result wins); falls back to `[::]` so the server still comes up
/// on IPv6-only hosts.
fn bind_listener(port: u16) -> Result<TcpListener> {
    match bind_one(Domain::IPV4, SocketAddr::from(([0, 0, 0, 0], port))) {
        Ok(listener) => Ok(listener),
        Err(v4_err) => bind_one(Domain::IPV6, SocketAddr::from(([0u16; 8], port)))
            .with_context(|| format!("binding port {port} on IPv4 failed ({v4_err}), and IPv6 fallback also failed")),
    }
}

fn bind_one(domain: Domain, addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Install handlers that flip `shutdown` on `SIGINT`/`SIGTERM`. The accept
/// loop notices the flag on its next iteration; a signal delivered while it
/// is blocked in `accept()` additionally interrupts that syscall on Linux,
/// so shutdown is prompt even for an idle server.
fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown))
            .with_context(|| format!("registering handler for signal {sig}"))?;
    }
    Ok(())
}

/// Install the process-wide `tracing` subscriber, gated by the runtime
/// `SET_LOG_LEVEL`-controlled threshold in `log_controller`. `RUST_LOG`, when
/// set, takes priority -- it is the operator reaching for finer-grained
/// target/module filtering than the wire protocol's five-level scale exposes.
fn init_tracing(log_controller: &LogController) {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .init();
        return;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_filter(filter_fn(log_controller.filter())),
        )
        .init();
}
