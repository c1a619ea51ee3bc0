//! Accept loop: one thread blocks in `accept`, spawning one handler thread
//! per connection.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::session::{SharedState, Session};

/// Runs the accept loop until `shutdown` is observed true. `shutdown` is
/// checked only between `accept` calls -- a signal handler sets it and then
/// this thread's next `accept` either returns a new connection (handled
/// normally; the flag is caught on the following iteration) or the listener
/// is dropped from another thread, which unblocks `accept` with an error.
pub fn run(listener: TcpListener, shared: Arc<SharedState>, shutdown: Arc<AtomicBool>) {
    tracing::info!(local_addr = ?listener.local_addr().ok(), "accepting connections");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested, exiting accept loop");
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                tracing::info!(peer = %addr, "connection accepted");
                let shared = Arc::clone(&shared);
                let peer = addr.to_string();
                std::thread::spawn(move || {
                    Session::new(stream, peer, shared).run();
                });
            }
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}
