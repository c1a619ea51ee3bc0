//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

/// Unified error type for the scheduler, per-client task manager, and
/// registries.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The referenced task does not exist in this client's task manager.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The task id that was looked up.
        task_id: String,
    },

    /// The worker pool has been shut down and will not accept new work.
    #[error("worker pool is shut down")]
    PoolShutdown,
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
