//! Per-client connection state machine.
//!
//! One [`Session`] owns exactly one TCP connection, its own
//! [`TaskManager`](canctl_kernel::TaskManager) namespace, and its own
//! [`SubprocessSupervisor`](canctl_proc::SubprocessSupervisor) -- keeping the
//! supervisor per-session (rather than global) is what makes "in-flight PIDs
//! for this session" a precise set instead of a global map keyed by a
//! `task_id` that is only unique within one client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use canctl_kernel::{InterfaceRegistry, TaskManager, ThreadRegistry, WorkerPool};
use canctl_proc::SubprocessSupervisor;

use crate::command::{self, CansendSpec, Command};
use crate::log_level::{LogController, LogLevel};

/// Commands are read in buffers up to this many bytes, matching the
/// reference server's fixed receive buffer.
const MAX_COMMAND_BYTES: usize = 10_000;

/// Shared, process-wide state every session needs read access to.
pub struct SharedState {
    pub pool: Arc<WorkerPool>,
    pub thread_registry: Arc<ThreadRegistry>,
    pub interfaces: Arc<InterfaceRegistry>,
    pub log_controller: LogController,
}

/// Runs one client connection to completion: reads commands, dispatches
/// them, and tears the session down on disconnect or `SHUTDOWN`.
pub struct Session {
    stream: TcpStream,
    peer: String,
    shared: Arc<SharedState>,
    supervisor: Arc<SubprocessSupervisor>,
    tasks: TaskManager<SubprocessSupervisor>,
    handler_id: canctl_kernel::RegistryId,
}

impl Session {
    pub fn new(stream: TcpStream, peer: String, shared: Arc<SharedState>) -> Self {
        let supervisor = Arc::new(SubprocessSupervisor::new());
        let tasks = TaskManager::new(Arc::clone(&shared.pool), Arc::clone(&supervisor));
        let handler_id = shared
            .thread_registry
            .add(format!("client handler for {peer}"));

        Self {
            stream,
            peer,
            shared,
            supervisor,
            tasks,
            handler_id,
        }
    }

    /// Read and dispatch commands until the client disconnects or sends
    /// `SHUTDOWN`.
    pub fn run(mut self) {
        let mut buf = [0u8; MAX_COMMAND_BYTES];
        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    tracing::info!(peer = %self.peer, "client disconnected");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(peer = %self.peer, error = %e, "recv failed");
                    break;
                }
            };

            let line = String::from_utf8_lossy(&buf[..n]);
            let line = line.trim();
            tracing::debug!(peer = %self.peer, command = %line, "received command");

            let cmd = command::parse(line);
            if matches!(cmd, Command::Shutdown) {
                tracing::info!(peer = %self.peer, "received SHUTDOWN");
                break;
            }

            let reply = self.dispatch(cmd);
            if let Err(e) = self.stream.write_all(reply.as_bytes()) {
                tracing::error!(peer = %self.peer, error = %e, "send failed");
                break;
            }
        }

        self.cleanup();
    }

    fn dispatch(&mut self, cmd: Command) -> String {
        match cmd {
            Command::Cansend(payload) => self.handle_cansend(&payload),
            Command::SendTask(payload) => self.handle_send_task(&payload),
            Command::Pause(task_id) => match self.tasks.pause(&task_id) {
                Ok(()) => format!("Paused {task_id}\n"),
                Err(_) => "Task not found\n".to_string(),
            },
            Command::Resume(task_id) => match self.tasks.resume(&task_id) {
                Ok(()) => format!("Resumed {task_id}\n"),
                Err(_) => "Task not found\n".to_string(),
            },
            Command::KillTask(task_id) => match self.tasks.kill(&task_id) {
                Ok(()) => {
                    self.supervisor.kill_task(&task_id);
                    format!("Task {task_id} killed\n")
                }
                Err(_) => "Task not found\n".to_string(),
            },
            Command::KillAllTasks => {
                self.tasks.kill_all();
                "All tasks killed\n".to_string()
            }
            Command::ListTasks => self.tasks.list(),
            Command::ListCanInterfaces => {
                self.shared.interfaces.refresh();
                self.shared.interfaces.render()
            }
            Command::ListThreads => self.shared.thread_registry.render(),
            Command::SetLogLevel(level_str) => match level_str.parse::<LogLevel>() {
                Ok(level) => {
                    self.shared.log_controller.set(level);
                    format!("Log level set to {}\n", level.as_str())
                }
                Err(_) => "Invalid log level\n".to_string(),
            },
            Command::KillAll => {
                self.supervisor.kill_all();
                "All processes killed.\n".to_string()
            }
            Command::KillThread(id_str) => match id_str.parse::<canctl_kernel::RegistryId>() {
                Ok(id) => {
                    // A best-effort removal: an id that parses but names no
                    // live entry (already exited, or never existed) still
                    // reports success, matching the reference behavior.
                    self.shared.thread_registry.remove(id);
                    "Thread removed\n".to_string()
                }
                Err(_) => "Invalid thread ID\n".to_string(),
            },
            Command::Shutdown => unreachable!("handled in run() before dispatch"),
            Command::Unknown(raw) => format!("Unknown command: {raw}"),
        }
    }

    fn handle_cansend(&mut self, payload: &str) -> String {
        match CansendSpec::parse(payload, |iface| self.shared.interfaces.is_valid(iface)) {
            Ok(spec) => {
                let task_id = self
                    .tasks
                    .schedule_recurring(spec.command, spec.time_ms, spec.priority);
                format!("OK: CANSEND scheduled with task ID: {task_id}\n")
            }
            Err(e) => e.message(),
        }
    }

    fn handle_send_task(&mut self, payload: &str) -> String {
        match CansendSpec::parse(payload, |iface| self.shared.interfaces.is_valid(iface)) {
            Ok(spec) => {
                let task_id = self
                    .tasks
                    .schedule_single_shot(spec.command, spec.time_ms, spec.priority);
                format!("OK: SEND_TASK scheduled with task ID: {task_id}\n")
            }
            Err(e) => e.message(),
        }
    }

    fn cleanup(&self) {
        self.tasks.kill_all();
        self.supervisor.kill_all();
        self.shared.thread_registry.remove(self.handler_id);
        tracing::info!(peer = %self.peer, "session cleaned up");
    }
}
