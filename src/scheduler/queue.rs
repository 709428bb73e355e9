//! Due-time ordered task queue
//!
//! A min-heap of `(due, term)` paired with a membership set so a term is
//! queued at most once. One consumer (the control loop) and any number of
//! producers (finishing jobs) share it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::Term;

/// A term waiting to be scraped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub due: Instant,
    pub term: Term,
}

impl Ord for Task {
    // Reversed so BinaryHeap pops the earliest due-time first; ties go to
    // the lexicographically smaller term
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.term.cmp(&self.term))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<Task>,
    members: HashSet<Term>,
}

/// Thread-safe priority queue of terms keyed by due-time
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    head_changed: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `term` for `due`. Returns `false` without changing anything if
    /// the term is already queued.
    pub fn add(&self, term: Term, due: Instant) -> bool {
        let new_head = {
            let mut inner = self.lock();
            if !inner.members.insert(term.clone()) {
                tracing::trace!(term = %term, "Term already queued");
                return false;
            }
            let new_head = inner.heap.peek().map_or(true, |head| due < head.due);
            inner.heap.push(Task { due, term });
            new_head
        };

        if new_head {
            self.head_changed.notify_one();
        }
        true
    }

    /// Resolves once a task has been added ahead of the previous head
    pub async fn head_changed(&self) {
        self.head_changed.notified().await;
    }

    /// Remove and return the earliest task, due or not. The caller decides
    /// whether it is time to run it.
    pub fn pop_due(&self) -> Option<Task> {
        let mut inner = self.lock();
        let task = inner.heap.pop()?;
        inner.members.remove(&task.term);
        Some(task)
    }

    /// Due-time of the earliest task
    pub fn peek_due(&self) -> Option<Instant> {
        self.lock().heap.peek().map(|task| task.due)
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.lock().members.contains(term)
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_pops_in_due_order() {
        let queue = TaskQueue::new();
        let now = Instant::now();
        queue.add(Term::new("late"), now + Duration::from_secs(30));
        queue.add(Term::new("early"), now + Duration::from_secs(10));
        queue.add(Term::new("middle"), now + Duration::from_secs(20));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_due())
            .map(|task| task.term.to_string())
            .collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_add_is_idempotent() {
        let queue = TaskQueue::new();
        let now = Instant::now();
        let term = Term::new("rust");

        assert!(queue.add(term.clone(), now + Duration::from_secs(60)));
        assert!(!queue.add(term.clone(), now));
        assert_eq!(queue.len(), 1);
        // the first due-time is kept
        assert_eq!(queue.peek_due(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_pop_clears_membership() {
        let queue = TaskQueue::new();
        let term = Term::new("rust");
        queue.add(term.clone(), Instant::now());
        assert!(queue.contains(&term));

        let task = queue.pop_due().unwrap();
        assert_eq!(task.term, term);
        assert!(!queue.contains(&term));
        assert!(queue.add(term, Instant::now()));
    }

    #[test]
    fn test_pop_does_not_check_due_time() {
        let queue = TaskQueue::new();
        queue.add(Term::new("future"), Instant::now() + Duration::from_secs(3600));
        assert!(queue.pop_due().is_some());
        assert!(queue.pop_due().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ties_broken_by_term() {
        let queue = TaskQueue::new();
        let due = Instant::now();
        queue.add(Term::new("b"), due);
        queue.add(Term::new("a"), due);
        queue.add(Term::new("c"), due);

        assert_eq!(queue.pop_due().unwrap().term.as_str(), "a");
        assert_eq!(queue.pop_due().unwrap().term.as_str(), "b");
    }

    #[tokio::test]
    async fn test_earlier_task_wakes_waiter() {
        let queue = TaskQueue::new();
        let now = Instant::now();
        queue.add(Term::new("a"), now + Duration::from_secs(60));
        // consume the permit stored by the first add
        queue.head_changed().await;

        queue.add(Term::new("b"), now + Duration::from_secs(120));
        let later = tokio::time::timeout(Duration::from_millis(10), queue.head_changed()).await;
        assert!(later.is_err());

        queue.add(Term::new("c"), now + Duration::from_secs(30));
        let earlier = tokio::time::timeout(Duration::from_millis(10), queue.head_changed()).await;
        assert!(earlier.is_ok());
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(TaskQueue::new());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        // half the terms collide across threads
                        let term = Term::new(&format!("t{}", (i % 2) * 1000 + j));
                        queue.add(term, now + Duration::from_secs(j as u64));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        let mut last = now;
        while let Some(task) = queue.pop_due() {
            assert!(task.due >= last);
            last = task.due;
        }
    }
}
