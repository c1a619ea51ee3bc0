//! Fixed-size worker pool driven by a deadline-ordered priority queue.
//!
//! A single `Mutex<DeadlineHeap>` plus one `Condvar` mediates every
//! enqueue/dequeue. Work units here are coarse (a subprocess spawn-and-wait),
//! so contention on the one queue lock is low; a lock-free queue would add
//! complexity for no measurable win. Workers never hold the queue lock while
//! running an action, and the queue lock is never held while acquiring any
//! other lock in this crate (it stays innermost).

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::queue::{Action, DeadlineHeap, ScheduledItem};
use crate::thread_registry::ThreadRegistry;

struct Shared {
    heap: Mutex<DeadlineHeap>,
    cv: Condvar,
    stop: Mutex<bool>,
    sequence: Mutex<u64>,
}

/// Fixed set of worker threads that pull due items off the deadline queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Clamp `configured` to `[1, hardware_parallelism_hint]` and spawn that
    /// many worker threads, each registering itself in `registry`.
    pub fn new(configured: usize, registry: Arc<ThreadRegistry>) -> Arc<Self> {
        let hw_hint = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let size = configured.clamp(1, hw_hint);

        let shared = Arc::new(Shared {
            heap: Mutex::new(DeadlineHeap::new()),
            cv: Condvar::new(),
            stop: Mutex::new(false),
            sequence: Mutex::new(0),
        });

        let pool = Arc::new(Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(size)),
        });

        let mut workers = Vec::with_capacity(size);
        for idx in 0..size {
            let shared = Arc::clone(&shared);
            let registry = Arc::clone(&registry);
            let handle = std::thread::Builder::new()
                .name(format!("canctl-worker-{idx}"))
                .spawn(move || Self::worker_loop(shared, registry))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        *pool.workers.lock().unwrap() = workers;

        pool
    }

    /// Schedule `action` with an effectively-immediate deadline so that
    /// priority/FIFO alone order it among other immediate work.
    pub fn enqueue(&self, priority: i32, action: Action) {
        self.enqueue_at(Instant::now(), priority, false, action);
    }

    /// Schedule `action` for the given monotonic `deadline`.
    pub fn enqueue_at(
        &self,
        deadline: Instant,
        priority: i32,
        drop_if_missed: bool,
        action: Action,
    ) {
        let sequence = {
            let mut seq = self.shared.sequence.lock().unwrap();
            let current = *seq;
            *seq = seq.wrapping_add(1);
            current
        };

        {
            let mut heap = self.shared.heap.lock().unwrap();
            heap.push(ScheduledItem {
                deadline,
                priority,
                sequence,
                drop_if_missed,
                action,
            });
        }
        self.shared.cv.notify_one();
    }

    /// Signal every worker to stop after finishing whatever it is currently
    /// executing, and wake any worker parked in the condition variable.
    pub fn shutdown(&self) {
        // Acquire the heap lock before flipping `stop` so a worker that is
        // mid-check (holding the heap lock, about to call `cv.wait`) cannot
        // observe `stop == false` and then block on a wait that nothing will
        // ever wake. Any worker already parked in `cv.wait` has released the
        // heap lock, so this does not deadlock against it.
        let _heap = self.shared.heap.lock().unwrap();
        *self.shared.stop.lock().unwrap() = true;
        drop(_heap);
        self.shared.cv.notify_all();
    }

    fn worker_loop(shared: Arc<Shared>, registry: Arc<ThreadRegistry>) {
        let id = registry.add("thread pool worker");

        loop {
            let mut heap = shared.heap.lock().unwrap();
            loop {
                if *shared.stop.lock().unwrap() {
                    registry.remove(id);
                    return;
                }

                if let Some(deadline) = heap.peek_deadline() {
                    let now = Instant::now();
                    if deadline <= now {
                        break;
                    }
                    let (guard, _timeout) = shared
                        .cv
                        .wait_timeout(heap, deadline.saturating_duration_since(now))
                        .unwrap();
                    heap = guard;
                } else {
                    // Queue empty: wait indefinitely. `enqueue_at` and
                    // `shutdown` both hold the heap mutex (or acquire it
                    // before `notify_one`/`notify_all` can race ahead of this
                    // wait), so a push or a shutdown request can never be
                    // missed between the `is_empty` check above and this
                    // call.
                    heap = shared.cv.wait(heap).unwrap();
                }
            }

            let item = heap.pop_if_due(Instant::now());
            drop(heap);

            let Some(item) = item else { continue };

            if item.drop_if_missed && item.deadline < Instant::now() {
                continue;
            }

            if panic::catch_unwind(AssertUnwindSafe(item.action)).is_err() {
                tracing::error!("panic in scheduled action, worker continuing");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}
