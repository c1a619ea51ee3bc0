//! Process-wide registry of active worker and client-handler threads.
//!
//! Mirrors the adapter registry's "one concurrent map behind its own lock"
//! shape: every thread that wants to be observable via `LIST_THREADS`
//! registers itself on start and removes itself on exit. Backed by
//! [`DashMap`] so registration/removal from many threads never contends on a
//! single `Mutex`.
//!
//! Registry entries are keyed by a small monotonic `u64` rather than
//! `std::thread::ThreadId`: the standard id has no stable way to be rendered
//! as, or parsed back from, text, and `KILL_THREAD <thread_id>` needs both.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Handle returned by [`ThreadRegistry::add`]; hand this back to
/// [`ThreadRegistry::remove`] when the thread exits.
pub type RegistryId = u64;

/// Metadata about one registered thread.
#[derive(Debug, Clone)]
pub struct ThreadRegistryEntry {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

/// Concurrent registry of worker and client-handler threads.
pub struct ThreadRegistry {
    inner: DashMap<RegistryId, ThreadRegistryEntry>,
    next_id: AtomicU64,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register the calling thread under `name`, returning the id assigned
    /// to it.
    pub fn add(&self, name: impl Into<String>) -> RegistryId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        tracing::debug!(thread_id = id, name = %name, "thread registered");
        self.inner.insert(
            id,
            ThreadRegistryEntry {
                name,
                started_at: Utc::now(),
            },
        );
        id
    }

    /// Remove a thread entry. Best-effort: removing an id that isn't present
    /// (e.g. a client-supplied `KILL_THREAD` with a stale id) is a no-op from
    /// the registry's point of view; the caller decides what reply that
    /// deserves.
    pub fn remove(&self, id: RegistryId) -> bool {
        let removed = self.inner.remove(&id).is_some();
        if removed {
            tracing::debug!(thread_id = id, "thread unregistered");
        }
        removed
    }

    /// Render every registered thread as `  <id> (<name>)` lines, in the
    /// format `LIST_THREADS` replies with.
    pub fn render(&self) -> String {
        let mut out = String::from("Active threads:\n");
        for entry in self.inner.iter() {
            out.push_str(&format!("  {} ({})\n", entry.key(), entry.value().name));
        }
        out
    }

    pub fn contains(&self, id: RegistryId) -> bool {
        self.inner.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
