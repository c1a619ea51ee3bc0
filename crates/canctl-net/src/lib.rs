//! Line-oriented TCP command protocol for the CAN control server.
//!
//! - **[`command`]** -- Command parsing and longest-prefix dispatch.
//! - **[`session`]** -- Per-client connection state machine and cleanup.
//! - **[`server`]** -- Accept loop that spawns one handler thread per client.
//! - **[`log_level`]** -- Runtime-mutable log verbosity shared with the
//!   tracing subscriber.

pub mod command;
pub mod log_level;
pub mod server;
pub mod session;

pub use command::{CansendParseError, CansendSpec, Command};
pub use log_level::{LogController, LogLevel};
pub use session::{SharedState, Session};
