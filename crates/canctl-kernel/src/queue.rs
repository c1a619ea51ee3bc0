//! Deadline-ordered priority queue.
//!
//! Work items are ordered by earliest [`Instant`] deadline first, then by
//! highest priority, then by lowest sequence number (FIFO among otherwise-tied
//! items). [`BinaryHeap`] is a max-heap, so [`ScheduledItem`]'s [`Ord`] impl
//! inverts all three fields: the item that "should run soonest" compares as
//! greatest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// The boxed unit of work a worker executes once it is due.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// A single pending execution in the deadline queue.
pub struct ScheduledItem {
    pub deadline: Instant,
    pub priority: i32,
    pub sequence: u64,
    /// Reserved: if true, a worker observing `now > deadline` at dequeue time
    /// skips the action without logging, instead of running it late. No
    /// command path sets this true yet; the field is plumbed through so a
    /// future overload-shedding policy can flip it without touching the
    /// queue's ordering logic.
    pub drop_if_missed: bool,
    pub action: Action,
}

impl PartialEq for ScheduledItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
            && self.priority == other.priority
            && self.sequence == other.sequence
    }
}
impl Eq for ScheduledItem {}

impl PartialOrd for ScheduledItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier deadline must sort greater (BinaryHeap pops the max).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Plain `BinaryHeap` wrapper kept separate from locking so
/// [`crate::pool::WorkerPool`] can reason about the mutex/condvar pairing on
/// its own.
#[derive(Default)]
pub struct DeadlineHeap {
    heap: BinaryHeap<ScheduledItem>,
}

impl DeadlineHeap {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, item: ScheduledItem) {
        self.heap.push(item);
    }

    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|item| item.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn pop_if_due(&mut self, now: Instant) -> Option<ScheduledItem> {
        if self.heap.peek().is_some_and(|top| top.deadline <= now) {
            self.heap.pop()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(deadline: Instant, priority: i32, sequence: u64) -> ScheduledItem {
        ScheduledItem {
            deadline,
            priority,
            sequence,
            drop_if_missed: false,
            action: Box::new(|| {}),
        }
    }

    #[test]
    fn earliest_deadline_first() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(item(now + std::time::Duration::from_millis(100), 5, 0));
        heap.push(item(now + std::time::Duration::from_millis(10), 5, 1));

        let first = heap.pop_if_due(now + std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(first.sequence, 1);
    }

    #[test]
    fn priority_breaks_deadline_tie() {
        let now = Instant::now();
        let deadline = now + std::time::Duration::from_millis(10);
        let mut heap = DeadlineHeap::new();
        heap.push(item(deadline, 5, 0));
        heap.push(item(deadline, 9, 1));

        let first = heap.pop_if_due(now + std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(first.priority, 9);
    }

    #[test]
    fn sequence_breaks_full_tie() {
        let now = Instant::now();
        let deadline = now + std::time::Duration::from_millis(10);
        let mut heap = DeadlineHeap::new();
        heap.push(item(deadline, 5, 2));
        heap.push(item(deadline, 5, 1));

        let first = heap.pop_if_due(now + std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(first.sequence, 1);
    }

    #[test]
    fn not_due_is_not_popped() {
        let now = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(item(now + std::time::Duration::from_secs(60), 5, 0));
        assert!(heap.pop_if_due(now).is_none());
    }
}
