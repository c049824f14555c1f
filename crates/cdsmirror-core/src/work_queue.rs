//! Lock-free work queue for distributing partitions across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue handing each item to exactly one worker.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next
/// item; items come out in insertion order. Abandoning the queue with
/// [`close()`](WorkQueue::close) tells how many were never handed out.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item (lock-free)
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    /// Stop handing out items; returns how many were left behind.
    pub fn close(&self) -> usize {
        let prev = self.cursor.swap(usize::MAX / 2, Ordering::Relaxed);
        self.items.len().saturating_sub(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_in_order() {
        let q = WorkQueue::new(vec![1, 2, 3]);
        assert_eq!(q.next(), Some(&1));
        assert_eq!(q.next(), Some(&2));
        assert_eq!(q.next(), Some(&3));
        assert_eq!(q.next(), None);
        assert_eq!(q.close(), 0);
    }

    #[test]
    fn close_reports_leftovers() {
        let q = WorkQueue::new(vec!['a', 'b', 'c', 'd']);
        q.next();
        assert_eq!(q.close(), 3);
        assert_eq!(q.next(), None);
        assert_eq!(q.close(), 0);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let q = WorkQueue::new((0..1000).collect::<Vec<_>>());
        let seen = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some(v) = q.next() {
                        seen.lock().unwrap().push(*v);
                    }
                });
            }
        });
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn empty_queue() {
        let q: WorkQueue<i32> = WorkQueue::new(vec![]);
        assert_eq!(q.next(), None);
        assert_eq!(q.close(), 0);
    }
}
