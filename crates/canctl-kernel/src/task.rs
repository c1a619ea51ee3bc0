//! Per-client task lifecycle: recurring and single-shot schedules that drive
//! the worker pool, plus pause/resume/kill and status rendering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{KernelError, Result};
use crate::pool::WorkerPool;

/// Default priority applied whenever a client-supplied priority token is
/// missing, out of range, or not a single digit.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Recurring tasks that find themselves paused re-poll on this cadence
/// before checking whether they have been resumed.
const PAUSE_BACKOFF: Duration = Duration::from_millis(50);

/// A schedule is either a fixed-cadence recurring send or a delayed
/// single-shot send.
#[derive(Debug, Clone, Copy)]
pub enum TaskKind {
    Recurring { interval_ms: u64 },
    SingleShot { delay_ms: u64 },
}

/// Mutable record for one client-owned task. The `active`/`paused` flags are
/// shared (via `Arc`) with every closure scheduled for this task so that
/// setting `active` to `false` makes all outstanding closures no-ops on their
/// next tick, without any of them holding a strong reference back to the
/// `TaskManager` itself.
struct TaskRecord {
    kind: TaskKind,
    descriptor: Mutex<String>,
    active: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    last_error: Mutex<Option<String>>,
}

/// Derived status string shown in `LIST_TASKS` (before the descriptor).
fn status_word(active: bool, paused: bool, has_error: bool) -> &'static str {
    if !active {
        if has_error { "stopped (error)" } else { "stopped" }
    } else if paused {
        "paused"
    } else {
        "running"
    }
}

/// Short tag shown in `LIST_TASKS` identifying whether a task re-enqueues
/// itself or runs exactly once, read from [`TaskRecord::kind`] rather than
/// inferred from the descriptor text.
fn kind_word(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Recurring { .. } => "recurring",
        TaskKind::SingleShot { .. } => "single-shot",
    }
}

/// Normalize a client-supplied priority token: a single ASCII digit `0`-`9`
/// parses to itself; anything else (missing, multi-character, non-digit)
/// silently falls back to [`DEFAULT_PRIORITY`].
pub fn parse_priority(token: Option<&str>) -> i32 {
    match token {
        Some(s) if s.len() == 1 => s
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as i32)
            .unwrap_or(DEFAULT_PRIORITY),
        _ => DEFAULT_PRIORITY,
    }
}

/// Invokes the external CAN-send utility for one task execution and reports
/// success/failure. Implemented by `canctl-proc`'s subprocess supervisor; the
/// task manager only depends on this narrow contract so the kernel crate
/// never needs to know how a process gets spawned.
pub trait Supervisor: Send + Sync + 'static {
    /// Run `command` for `task_id`. Returns `true` on a clean exit (status
    /// 0). On failure the implementation is responsible for recording a
    /// short human-readable reason retrievable via [`Supervisor::last_error`].
    fn run(&self, command: &str, task_id: &str) -> bool;

    /// Short human-readable reason the most recent [`Supervisor::run`] for
    /// `task_id` failed, if any.
    fn last_error(&self, task_id: &str) -> Option<String>;
}

/// Per-client owner of a task namespace. Exactly one per connected client.
pub struct TaskManager<S: Supervisor> {
    tasks: Mutex<HashMap<String, Arc<TaskRecord>>>,
    counter: AtomicU64,
    pool: Arc<WorkerPool>,
    supervisor: Arc<S>,
}

impl<S: Supervisor> TaskManager<S> {
    pub fn new(pool: Arc<WorkerPool>, supervisor: Arc<S>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            pool,
            supervisor,
        }
    }

    fn next_task_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("task_{n}")
    }

    /// Schedule `command` to run every `interval_ms` milliseconds, starting
    /// `interval_ms` from now (first invocation is not immediate, so cadence
    /// stays uniform).
    pub fn schedule_recurring(&self, command: String, interval_ms: u64, priority: i32) -> String {
        let task_id = self.next_task_id();
        let descriptor = format!("{command} every {interval_ms}ms priority {priority}");
        let record = Arc::new(TaskRecord {
            kind: TaskKind::Recurring { interval_ms },
            descriptor: Mutex::new(descriptor),
            active: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
            last_error: Mutex::new(None),
        });
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), Arc::clone(&record));

        Self::enqueue_recurring_tick(
            Arc::clone(&self.pool),
            Arc::clone(&self.supervisor),
            record,
            command,
            interval_ms,
            priority,
            task_id.clone(),
        );

        task_id
    }

    fn enqueue_recurring_tick(
        pool: Arc<WorkerPool>,
        supervisor: Arc<S>,
        record: Arc<TaskRecord>,
        command: String,
        interval_ms: u64,
        priority: i32,
        task_id: String,
    ) {
        let deadline = Instant::now() + Duration::from_millis(interval_ms);
        pool.enqueue_at(
            deadline,
            priority,
            false,
            Box::new(move || {
                if !record.active.load(Ordering::Acquire) {
                    return;
                }

                if !record.paused.load(Ordering::Acquire) {
                    let ok = supervisor.run(&command, &task_id);
                    if !ok {
                        record.active.store(false, Ordering::Release);
                        if let Some(reason) = supervisor.last_error(&task_id) {
                            *record.last_error.lock().unwrap() = Some(reason);
                        }
                    }
                }

                if record.active.load(Ordering::Acquire) {
                    Self::enqueue_recurring_tick(
                        pool, supervisor, record, command, interval_ms, priority, task_id,
                    );
                }
            }),
        );
    }

    /// Schedule `command` to run once, `delay_ms` milliseconds from now.
    pub fn schedule_single_shot(&self, command: String, delay_ms: u64, priority: i32) -> String {
        let task_id = self.next_task_id();
        let descriptor = format!("{command} once after {delay_ms}ms priority {priority}");
        let record = Arc::new(TaskRecord {
            kind: TaskKind::SingleShot { delay_ms },
            descriptor: Mutex::new(descriptor),
            active: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
            last_error: Mutex::new(None),
        });
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.clone(), Arc::clone(&record));

        let deadline = Instant::now() + Duration::from_millis(delay_ms);
        self.pool.enqueue_at(
            deadline,
            priority,
            false,
            Self::single_shot_action(
                Arc::clone(&self.pool),
                Arc::clone(&self.supervisor),
                record,
                command,
                priority,
                task_id.clone(),
            ),
        );

        task_id
    }

    fn single_shot_action(
        pool: Arc<WorkerPool>,
        supervisor: Arc<S>,
        record: Arc<TaskRecord>,
        command: String,
        priority: i32,
        task_id: String,
    ) -> crate::queue::Action {
        Box::new(move || {
            if !record.active.load(Ordering::Acquire) {
                return;
            }

            if record.paused.load(Ordering::Acquire) {
                let deadline = Instant::now() + PAUSE_BACKOFF;
                pool.enqueue_at(
                    deadline,
                    priority,
                    false,
                    Self::single_shot_action(
                        Arc::clone(&pool),
                        supervisor,
                        record,
                        command,
                        priority,
                        task_id,
                    ),
                );
                return;
            }

            let ok = supervisor.run(&command, &task_id);
            if ok {
                record.active.store(false, Ordering::Release);
                *record.descriptor.lock().unwrap() = format!("{command} once (completed)");
            } else {
                if let Some(reason) = supervisor.last_error(&task_id) {
                    *record.last_error.lock().unwrap() = Some(reason);
                }
                *record.descriptor.lock().unwrap() = format!("{command} once (error)");
            }
        })
    }

    /// Flip `paused` to true. No-op (reported as "not found") for an unknown
    /// or already-killed id.
    pub fn pause(&self, task_id: &str) -> Result<()> {
        let record = self.get(task_id)?;
        record.paused.store(true, Ordering::Release);
        Ok(())
    }

    /// Flip `paused` to false.
    pub fn resume(&self, task_id: &str) -> Result<()> {
        let record = self.get(task_id)?;
        record.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop a task permanently and forget it. Outstanding scheduled closures
    /// for this id observe `active == false` on their next tick and become
    /// no-ops.
    pub fn kill(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let record = tasks
            .remove(task_id)
            .ok_or_else(|| KernelError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        record.active.store(false, Ordering::Release);
        Ok(())
    }

    /// Apply [`TaskManager::kill`] to every task owned by this client.
    pub fn kill_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for record in tasks.values() {
            record.active.store(false, Ordering::Release);
        }
        tasks.clear();
    }

    /// Render every task as `"<id>: <descriptor> (<status>, <kind>)"`, with
    /// an additional `"  Error: <text>"` line when a `last_error` is present.
    pub fn list(&self) -> String {
        let tasks = self.tasks.lock().unwrap();
        let mut out = String::from("Active tasks:\n");
        for (id, record) in tasks.iter() {
            let active = record.active.load(Ordering::Acquire);
            let paused = record.paused.load(Ordering::Acquire);
            let last_error = record.last_error.lock().unwrap().clone();
            let status = status_word(active, paused, last_error.is_some());
            let descriptor = record.descriptor.lock().unwrap().clone();
            let kind = kind_word(record.kind);
            out.push_str(&format!("{id}: {descriptor} ({status}, {kind})\n"));
            if let Some(err) = last_error {
                out.push_str(&format!("  Error: {err}\n"));
            }
        }
        out
    }

    fn get(&self, task_id: &str) -> Result<Arc<TaskRecord>> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| KernelError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_registry::ThreadRegistry;
    use std::sync::Mutex as StdMutex;

    struct FakeSupervisor {
        succeed: bool,
        error: &'static str,
        calls: StdMutex<Vec<String>>,
    }

    impl Supervisor for FakeSupervisor {
        fn run(&self, command: &str, _task_id: &str) -> bool {
            self.calls.lock().unwrap().push(command.to_string());
            self.succeed
        }

        fn last_error(&self, _task_id: &str) -> Option<String> {
            if self.succeed {
                None
            } else {
                Some(self.error.to_string())
            }
        }
    }

    fn manager(succeed: bool) -> (TaskManager<FakeSupervisor>, Arc<FakeSupervisor>) {
        let registry = Arc::new(ThreadRegistry::new());
        let pool = WorkerPool::new(2, registry);
        let fake = Arc::new(FakeSupervisor {
            succeed,
            error: "cansend failed with exit code 1",
            calls: StdMutex::new(Vec::new()),
        });
        (TaskManager::new(pool, Arc::clone(&fake)), fake)
    }

    #[test]
    fn parse_priority_defaults() {
        assert_eq!(parse_priority(Some("9")), 9);
        assert_eq!(parse_priority(Some("0")), 0);
        assert_eq!(parse_priority(Some("10")), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(Some("a")), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(None), DEFAULT_PRIORITY);
    }

    #[test]
    fn single_shot_completes_and_deactivates() {
        let (mgr, fake) = manager(true);
        let id = mgr.schedule_single_shot("cansend vcan0 1#FF".into(), 20, 5);
        std::thread::sleep(Duration::from_millis(150));
        let listing = mgr.list();
        assert!(listing.contains("once (completed)"));
        assert!(listing.contains(&id));
        assert_eq!(fake.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn single_shot_failure_sets_error_and_stops() {
        let (mgr, _fake) = manager(false);
        mgr.schedule_single_shot("cansend vcan0 1#FF".into(), 20, 5);
        std::thread::sleep(Duration::from_millis(150));
        let listing = mgr.list();
        assert!(listing.contains("once (error)"));
        assert!(listing.contains("stopped (error)"));
        assert!(listing.contains("cansend failed with exit code 1"));
    }

    #[test]
    fn pause_blocks_side_effects_but_keeps_rescheduling() {
        let (mgr, fake) = manager(true);
        let id = mgr.schedule_recurring("cansend vcan0 1#FF".into(), 20, 5);
        mgr.pause(&id).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(fake.calls.lock().unwrap().len(), 0);
        assert!(mgr.list().contains("paused"));
    }

    #[test]
    fn kill_unknown_task_is_not_found() {
        let (mgr, _fake) = manager(true);
        let err = mgr.kill("task_999").unwrap_err();
        assert!(matches!(err, KernelError::TaskNotFound { .. }));
    }

    #[test]
    fn kill_then_kill_again_is_not_found() {
        let (mgr, _fake) = manager(true);
        let id = mgr.schedule_recurring("cansend vcan0 1#FF".into(), 1000, 5);
        mgr.kill(&id).unwrap();
        let err = mgr.kill(&id).unwrap_err();
        assert!(matches!(err, KernelError::TaskNotFound { .. }));
    }

    #[test]
    fn kill_all_empties_listing() {
        let (mgr, _fake) = manager(true);
        mgr.schedule_recurring("a".into(), 1000, 5);
        mgr.schedule_recurring("b".into(), 1000, 5);
        mgr.kill_all();
        assert_eq!(mgr.list(), "Active tasks:\n");
    }

    #[test]
    fn listing_tags_recurring_and_single_shot_kind() {
        let (mgr, _fake) = manager(true);
        let recurring = mgr.schedule_recurring("a".into(), 1000, 5);
        let once = mgr.schedule_single_shot("b".into(), 1000, 5);
        let listing = mgr.list();
        assert!(listing.lines().any(|l| l.starts_with(&recurring) && l.contains("recurring")));
        assert!(listing.lines().any(|l| l.starts_with(&once) && l.contains("single-shot")));
    }
}
