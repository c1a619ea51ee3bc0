//! Command parsing and longest-prefix dispatch for the line-oriented
//! protocol.
//!
//! Every recognized command is matched by prefix against one trimmed line.
//! Order matters: `KILL_ALL_TASKS` must be tried before the shorter
//! `KILL_ALL`, or the longer command would never be reached.

use canctl_kernel::parse_priority;

/// Parsed `CANSEND`/`SEND_TASK` payload, shared by both commands since they
/// differ only in what the server does with the resulting schedule (recur
/// vs. run once).
#[derive(Debug, PartialEq, Eq)]
pub struct CansendSpec {
    pub command: String,
    pub time_ms: u64,
    pub priority: i32,
}

/// Failure while parsing a `CANSEND`/`SEND_TASK` payload.
#[derive(Debug, PartialEq, Eq)]
pub enum CansendParseError {
    Syntax,
    IfaceUnavailable(String),
    InvalidTime,
    NegativeTime,
}

impl CansendParseError {
    /// Literal reply text for this error, per the protocol table.
    pub fn message(&self) -> String {
        match self {
            CansendParseError::Syntax => {
                "ERROR: Invalid CANSEND syntax. Usage: CANSEND#<id>#<payload>#<time_ms>#<bus> [priority 0-9]\n".to_string()
            }
            CansendParseError::IfaceUnavailable(iface) => format!(
                "ERROR: CAN interface '{iface}' is not available. Use LIST_CAN_INTERFACES to see available interfaces.\n"
            ),
            CansendParseError::InvalidTime => "ERROR: Invalid time value\n".to_string(),
            CansendParseError::NegativeTime => "ERROR: Time value must be non-negative\n".to_string(),
        }
    }
}

impl CansendSpec {
    /// Parse `<id>#<payload>#<time>#<iface>[#<prio>]`, already stripped of
    /// its `CANSEND#`/`SEND_TASK#` prefix. `is_valid_iface` is consulted
    /// after syntax validation but before the time value is parsed, matching
    /// the reference ordering of checks.
    pub fn parse(
        payload: &str,
        is_valid_iface: impl FnOnce(&str) -> bool,
    ) -> Result<Self, CansendParseError> {
        let parts: Vec<&str> = payload.split('#').map(str::trim).collect();
        if parts.len() < 4 {
            return Err(CansendParseError::Syntax);
        }

        let id = parts[0]
            .strip_prefix("0x")
            .or_else(|| parts[0].strip_prefix("0X"))
            .unwrap_or(parts[0]);
        let payload_field = parts[1];
        let time_str = parts[2].strip_suffix("ms").unwrap_or(parts[2]);
        let iface = parts[3];
        let priority = parse_priority(parts.get(4).copied().filter(|s| !s.is_empty()));

        if !is_valid_iface(iface) {
            return Err(CansendParseError::IfaceUnavailable(iface.to_string()));
        }

        let time_ms: i64 = time_str.parse().map_err(|_| CansendParseError::InvalidTime)?;
        if time_ms < 0 {
            return Err(CansendParseError::NegativeTime);
        }

        Ok(CansendSpec {
            command: canctl_proc::SubprocessSupervisor::build_command(iface, id, payload_field),
            time_ms: time_ms as u64,
            priority,
        })
    }
}

/// One parsed client command.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Cansend(String),
    SendTask(String),
    Pause(String),
    Resume(String),
    KillTask(String),
    KillAllTasks,
    ListTasks,
    ListCanInterfaces,
    ListThreads,
    SetLogLevel(String),
    KillAll,
    KillThread(String),
    Shutdown,
    Unknown(String),
}

/// Parse one trimmed line into a [`Command`]. Order of the `if`/`else if`
/// chain is significant: longer prefixes that share a shorter command as a
/// substring (`KILL_ALL_TASKS` vs `KILL_ALL`) must be tested first.
pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix("CANSEND#") {
        Command::Cansend(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("SEND_TASK#") {
        Command::SendTask(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("PAUSE ") {
        Command::Pause(rest.trim().to_string())
    } else if let Some(rest) = line.strip_prefix("RESUME ") {
        Command::Resume(rest.trim().to_string())
    } else if let Some(rest) = line.strip_prefix("KILL_TASK ") {
        Command::KillTask(rest.trim().to_string())
    } else if line == "KILL_ALL_TASKS" {
        Command::KillAllTasks
    } else if line == "LIST_TASKS" {
        Command::ListTasks
    } else if line == "LIST_CAN_INTERFACES" {
        Command::ListCanInterfaces
    } else if line == "LIST_THREADS" {
        Command::ListThreads
    } else if let Some(rest) = line.strip_prefix("SET_LOG_LEVEL ") {
        Command::SetLogLevel(rest.trim().to_string())
    } else if line == "KILL_ALL" {
        Command::KillAll
    } else if let Some(rest) = line.strip_prefix("KILL_THREAD ") {
        Command::KillThread(rest.trim().to_string())
    } else if line == "SHUTDOWN" {
        Command::Shutdown
    } else {
        Command::Unknown(line.to_string())
    }
}
