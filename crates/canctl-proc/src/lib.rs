//! Subprocess supervisor.
//!
//! Spawns the external `cansend` utility synchronously from a worker thread,
//! waits for it to finish, and classifies the outcome per the exit-status
//! taxonomy the scheduler relies on to disable a misbehaving task. The
//! command is invoked with an explicit argv rather than through a shell:
//! payload bytes in `CANSEND`/`SEND_TASK` ultimately originate from a remote
//! client, and a shell invocation would let an `iface` or `id#payload` field
//! containing shell metacharacters run arbitrary commands on the host.

use std::process::{Command, ExitStatus};

use canctl_kernel::Supervisor;
use dashmap::DashMap;

/// Binary invoked for every send. Not configurable: the wire protocol and
/// exit-status classification below are both specific to this utility.
const CANSEND_BIN: &str = "cansend";

/// The exit-status taxonomy a supervised `cansend` invocation can fail with.
/// Each variant's [`std::fmt::Display`] is the exact `last_error` text
/// surfaced on the next `LIST_TASKS`.
#[derive(Debug, thiserror::Error)]
enum SupervisorError {
    #[error("cansend failed with exit code {0}")]
    NonZeroExit(i32),
    #[error("cansend terminated by signal {0}")]
    Signaled(i32),
    #[error("waitpid failed: {0}")]
    WaitFailed(std::io::Error),
    #[error("fork() failed: system resource limit reached")]
    SpawnFailed,
}

/// Runs `cansend <iface> <id>#<payload>` and classifies the result.
///
/// Tracks the OS pid of every in-flight invocation, keyed by `task_id`, so a
/// session teardown or `KILL_ALL` can send a termination signal to processes
/// it no longer wants running (best-effort -- the process may have already
/// exited by the time the signal is sent).
pub struct SubprocessSupervisor {
    in_flight: DashMap<String, u32>,
    last_error: DashMap<String, String>,
}

impl Default for SubprocessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessSupervisor {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            last_error: DashMap::new(),
        }
    }

    /// Materialize the invocation string shown in a task's descriptor and
    /// passed to [`Supervisor::run`]: `cansend <iface> <id>#<payload>`.
    pub fn build_command(iface: &str, id: &str, payload: &str) -> String {
        format!("{CANSEND_BIN} {iface} {id}#{payload}")
    }

    /// All pids currently believed to be in flight, across every task.
    pub fn in_flight_pids(&self) -> Vec<u32> {
        self.in_flight.iter().map(|entry| *entry.value()).collect()
    }

    /// Best-effort termination signal to every currently tracked pid. Used by
    /// `KILL_ALL` and by session teardown. A pid that has already exited is
    /// silently ignored (the signal delivery fails and is not escalated).
    pub fn kill_all(&self) {
        for pid in self.in_flight_pids() {
            send_sigterm(pid);
        }
    }

    /// Terminate the pid tracked for `task_id`, if any is in flight.
    pub fn kill_task(&self, task_id: &str) {
        if let Some(entry) = self.in_flight.get(task_id) {
            send_sigterm(*entry.value());
        }
    }

    fn classify(&self, task_id: &str, spawn: std::io::Result<std::process::Child>) -> bool {
        let mut child = match spawn {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(task_id, error = %e, "fork() failed");
                self.record_failure(task_id, SupervisorError::SpawnFailed);
                return false;
            }
        };

        let pid = child.id();
        self.in_flight.insert(task_id.to_string(), pid);

        let wait_result = child.wait();
        self.in_flight.remove(task_id);

        match wait_result {
            Ok(status) => self.classify_status(task_id, status),
            Err(e) => {
                tracing::error!(task_id, error = %e, "waitpid failed");
                self.record_failure(task_id, SupervisorError::WaitFailed(e));
                false
            }
        }
    }

    fn classify_status(&self, task_id: &str, status: ExitStatus) -> bool {
        if status.success() {
            self.last_error.remove(task_id);
            return true;
        }

        let error = exit_error(status);
        tracing::warn!(task_id, reason = %error, "cansend invocation failed");
        self.record_failure(task_id, error);
        false
    }

    fn record_failure(&self, task_id: &str, error: SupervisorError) {
        self.last_error.insert(task_id.to_string(), error.to_string());
    }
}

impl Supervisor for SubprocessSupervisor {
    fn run(&self, command: &str, task_id: &str) -> bool {
        let Some(args) = shell_words(command) else {
            self.last_error
                .insert(task_id.to_string(), "invalid command syntax".to_string());
            return false;
        };
        let Some((bin, rest)) = args.split_first() else {
            self.last_error
                .insert(task_id.to_string(), "empty command".to_string());
            return false;
        };

        let spawn = Command::new(bin).args(rest).spawn();
        self.classify(task_id, spawn)
    }

    fn last_error(&self, task_id: &str) -> Option<String> {
        self.last_error.get(task_id).map(|entry| entry.clone())
    }
}

/// Split a materialized command string into argv. The command was built by
/// [`SubprocessSupervisor::build_command`], so whitespace splitting is
/// sufficient -- it never contains quoted arguments.
fn shell_words(command: &str) -> Option<Vec<String>> {
    let words: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if words.is_empty() { None } else { Some(words) }
}

#[cfg(unix)]
fn exit_error(status: ExitStatus) -> SupervisorError {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        SupervisorError::NonZeroExit(code)
    } else if let Some(signal) = status.signal() {
        SupervisorError::Signaled(signal)
    } else {
        SupervisorError::NonZeroExit(-1)
    }
}

#[cfg(not(unix))]
fn exit_error(status: ExitStatus) -> SupervisorError {
    SupervisorError::NonZeroExit(status.code().unwrap_or(-1))
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    // SAFETY: `kill` with a plain pid and SIGTERM has no preconditions beyond
    // the pid being a valid integer; a pid that no longer exists (already
    // reaped) simply returns ESRCH, which is the expected best-effort case.
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(pid, "SIGTERM delivery failed (process likely already exited)");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}
