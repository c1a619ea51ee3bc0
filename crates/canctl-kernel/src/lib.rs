//! canctl kernel.
//!
//! Provides the scheduling primitives shared by every client connection:
//!
//! - **[`queue`]** -- Deadline-ordered priority queue backing the worker pool.
//! - **[`pool`]** -- Fixed-size OS-thread worker pool that drains the queue
//!   under a `Mutex`/`Condvar` pair, with panic containment per action.
//! - **[`task`]** -- Per-client task lifecycle: recurring and single-shot
//!   schedules, pause/resume/kill, and status rendering.
//! - **[`thread_registry`]** -- Process-wide registry of worker and
//!   client-handler threads, keyed by a text-round-trippable id.
//! - **[`iface`]** -- Host CAN interface discovery and validation.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync`; this crate deliberately uses blocking
//! `std::thread` primitives rather than an async runtime, since the worker
//! pool's condition-variable wait is the concurrency model the rest of the
//! system is built around.

pub mod error;
pub mod iface;
pub mod pool;
pub mod queue;
pub mod task;
pub mod thread_registry;

pub use error::{KernelError, Result};
pub use iface::InterfaceRegistry;
pub use pool::WorkerPool;
pub use task::{DEFAULT_PRIORITY, Supervisor, TaskKind, TaskManager, parse_priority};
pub use thread_registry::{RegistryId, ThreadRegistry};
