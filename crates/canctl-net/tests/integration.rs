use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use canctl_kernel::{InterfaceRegistry, ThreadRegistry, WorkerPool};
use canctl_net::log_level::{LogController, LogLevel};
use canctl_net::session::SharedState;

fn spawn_server() -> std::net::SocketAddr {
    spawn_server_with(&[], 2)
}

/// Like [`spawn_server`] but with a pre-seeded, deterministic interface list
/// (bypassing real sysfs/`ip link` discovery) and a chosen worker count.
fn spawn_server_with(ifaces: &[&str], workers: usize) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = Arc::new(ThreadRegistry::new());
    let pool = WorkerPool::new(workers, Arc::clone(&registry));
    let shared = Arc::new(SharedState {
        pool,
        thread_registry: registry,
        interfaces: Arc::new(InterfaceRegistry::seeded(
            ifaces.iter().map(|s| s.to_string()).collect(),
        )),
        log_controller: LogController::new(LogLevel::Error),
    });

    std::thread::spawn(move || {
        canctl_net::server::run(listener, shared, Arc::new(AtomicBool::new(false)));
    });

    std::thread::sleep(Duration::from_millis(50));
    addr
}

fn roundtrip(addr: std::net::SocketAddr, command: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    send_and_read(&mut stream, command)
}

fn send_and_read(stream: &mut TcpStream, command: &str) -> String {
    stream.write_all(command.as_bytes()).unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

/// Drop a no-op `cansend` substitute at the front of `PATH`, once per test
/// binary. Every invocation appends its argv to a shared log file so tests
/// can observe how many times -- and with what arguments -- the supervisor
/// actually shelled out, without a real CAN stack on the host. Tests
/// distinguish their own invocations from other tests' by grepping for a
/// CAN id unique to that test.
fn ensure_fake_cansend_on_path() -> PathBuf {
    static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
    LOG_PATH
        .get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let log_path = dir.path().join("cansend.log");
            std::fs::write(&log_path, "").unwrap();

            let script_path = dir.path().join("cansend");
            std::fs::write(
                &script_path,
                format!("#!/bin/sh\necho \"$@\" >> {}\nexit 0\n", log_path.display()),
            )
            .unwrap();
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

            let existing = std::env::var("PATH").unwrap_or_default();
            let new_path = format!("{}:{existing}", dir.path().display());
            // SAFETY: mutated exactly once, behind `OnceLock`, before any test
            // spawns a `cansend` child that would observe `PATH`.
            unsafe { std::env::set_var("PATH", new_path) };

            // Keep the directory (and the script/log inside it) alive for
            // the rest of the test binary's lifetime.
            std::mem::forget(dir);
            log_path
        })
        .clone()
}

fn count_invocations(log_path: &Path, needle: &str) -> usize {
    std::fs::read_to_string(log_path)
        .unwrap_or_default()
        .lines()
        .filter(|line| line.contains(needle))
        .count()
}

#[test]
fn unknown_command_is_echoed_back() {
    let addr = spawn_server();
    let reply = roundtrip(addr, "NOT_A_REAL_COMMAND");
    assert_eq!(reply, "Unknown command: NOT_A_REAL_COMMAND");
}

#[test]
fn list_tasks_on_fresh_session_is_empty() {
    let addr = spawn_server();
    let reply = roundtrip(addr, "LIST_TASKS");
    assert_eq!(reply, "Active tasks:\n");
}

#[test]
fn pause_unknown_task_reports_not_found() {
    let addr = spawn_server();
    let reply = roundtrip(addr, "PAUSE task_999");
    assert_eq!(reply, "Task not found\n");
}

#[test]
fn cansend_against_unknown_interface_is_rejected() {
    let addr = spawn_server();
    let reply = roundtrip(addr, "CANSEND#123#DEADBEEF#1000#notreal");
    assert!(reply.contains("ERROR: CAN interface 'notreal' is not available"));
}

#[test]
fn set_log_level_accepts_known_names_only() {
    let addr = spawn_server();
    assert_eq!(roundtrip(addr, "SET_LOG_LEVEL DEBUG"), "Log level set to DEBUG\n");
    assert_eq!(roundtrip(addr, "SET_LOG_LEVEL NONSENSE"), "Invalid log level\n");
}

#[test]
fn list_can_interfaces_reports_none_without_a_host_can_stack() {
    let addr = spawn_server();
    let reply = roundtrip(addr, "LIST_CAN_INTERFACES");
    assert!(reply == "No CAN interfaces available\n" || reply.starts_with("Available CAN interfaces ("));
}

#[test]
fn shutdown_closes_the_connection_without_a_reply() {
    let addr = spawn_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(b"SHUTDOWN").unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0);
}

// Scenario 1: basic recurring CANSEND fires the supervisor at least twice.
#[test]
fn basic_recurring_invokes_supervisor_at_least_twice() {
    let log_path = ensure_fake_cansend_on_path();
    let addr = spawn_server_with(&["vcan0"], 2);
    let mut stream = TcpStream::connect(addr).unwrap();

    let reply = send_and_read(&mut stream, "CANSEND#123#DEADBEEF#40#vcan0\n");
    assert!(reply.starts_with("OK: CANSEND scheduled with task ID: task_0"));

    std::thread::sleep(Duration::from_millis(250));
    assert!(count_invocations(&log_path, "vcan0 123#DEADBEEF") >= 2);
}

// Scenario 2: hex id, ms suffix and explicit priority all materialize
// correctly into the command string and descriptor. The deadline/priority
// tie-break itself is exercised directly against the queue in
// `canctl-kernel`'s unit tests; this only checks that the session correctly
// passes the parsed values through.
#[test]
fn hex_id_ms_suffix_and_priority_materialize_into_descriptor() {
    let addr = spawn_server_with(&["vcan0"], 2);
    let mut stream = TcpStream::connect(addr).unwrap();

    let reply = send_and_read(&mut stream, "CANSEND#0x321#ABCDEF00#250ms#vcan0#9\n");
    assert!(reply.starts_with("OK: CANSEND scheduled with task ID: task_0"));

    let listing = send_and_read(&mut stream, "LIST_TASKS\n");
    assert!(listing.contains("cansend vcan0 321#ABCDEF00 every 250ms priority 9"));
}

// Scenario 4: single-shot task paused before it fires, resumed, and left to
// complete (or fail, against the no-op fake binary it always completes).
#[test]
fn single_shot_pauses_resumes_then_completes() {
    ensure_fake_cansend_on_path();
    let addr = spawn_server_with(&["vcan0"], 2);
    let mut stream = TcpStream::connect(addr).unwrap();

    let reply = send_and_read(&mut stream, "SEND_TASK#124#CAFEBABE#100#vcan0\n");
    assert!(reply.starts_with("OK: SEND_TASK scheduled with task ID: task_0"));

    assert_eq!(send_and_read(&mut stream, "PAUSE task_0\n"), "Paused task_0\n");
    assert!(send_and_read(&mut stream, "LIST_TASKS\n").contains("paused"));

    assert_eq!(send_and_read(&mut stream, "RESUME task_0\n"), "Resumed task_0\n");
    std::thread::sleep(Duration::from_millis(300));
    let listing = send_and_read(&mut stream, "LIST_TASKS\n");
    assert!(listing.contains("once (completed)") || listing.contains("once (error)"));
}

// Scenario 6: a client that schedules recurring tasks and disconnects stops
// generating supervisor invocations, and a fresh connection sees an empty
// task list rather than the departed client's tasks.
#[test]
fn disconnect_cleanup_stops_recurring_tasks_from_that_client() {
    let log_path = ensure_fake_cansend_on_path();
    let addr = spawn_server_with(&["vcan0"], 2);

    {
        let mut stream_a = TcpStream::connect(addr).unwrap();
        for id in ["201", "202", "203"] {
            let reply = send_and_read(&mut stream_a, &format!("CANSEND#{id}#DEADBEEF#40#vcan0\n"));
            assert!(reply.starts_with("OK: CANSEND scheduled"));
        }
        std::thread::sleep(Duration::from_millis(150));
        assert!(count_invocations(&log_path, "vcan0 201#DEADBEEF") >= 1);
    } // stream_a drops here, closing client A's connection

    std::thread::sleep(Duration::from_millis(150));
    let before = count_invocations(&log_path, "vcan0 201#DEADBEEF");
    std::thread::sleep(Duration::from_millis(150));
    let after = count_invocations(&log_path, "vcan0 201#DEADBEEF");
    assert_eq!(before, after, "disconnected client's recurring task kept firing");

    let mut stream_b = TcpStream::connect(addr).unwrap();
    let listing = send_and_read(&mut stream_b, "LIST_TASKS\n");
    assert_eq!(listing, "Active tasks:\n");
}
