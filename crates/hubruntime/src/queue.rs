use hubcore::RunId;
use std::collections::VecDeque;

/// Anything that can wait in the admission queue
pub trait Queued {
    fn run_id(&self) -> RunId;
}

/// FIFO holding area for runs that arrived while the cap was reached.
///
/// Not synchronized on its own; the engine mutates it under the same lock
/// as the running set so admission and draining stay atomic.
#[derive(Debug)]
pub struct AdmissionQueue<T> {
    entries: VecDeque<T>,
}

impl<T: Queued> AdmissionQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append and return the 1-based position in line
    pub fn enqueue(&mut self, entry: T) -> usize {
        self.entries.push_back(entry);
        self.entries.len()
    }

    /// Remove the oldest entry
    pub fn dequeue(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Take a specific run out of line, wherever it sits
    pub fn remove(&mut self, run_id: RunId) -> Option<T> {
        let index = self.entries.iter().position(|e| e.run_id() == run_id)?;
        self.entries.remove(index)
    }

    pub fn get(&self, run_id: RunId) -> Option<&T> {
        self.entries.iter().find(|e| e.run_id() == run_id)
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Queued> Default for AdmissionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Entry(RunId);

    impl Queued for Entry {
        fn run_id(&self) -> RunId {
            self.0
        }
    }

    #[test]
    fn dequeues_in_submission_order() {
        let mut queue = AdmissionQueue::new();
        let ids: Vec<RunId> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(queue.enqueue(Entry(*id)), i + 1);
        }

        let order: Vec<RunId> = std::iter::from_fn(|| queue.dequeue()).map(|e| e.0).collect();
        assert_eq!(order, ids);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_from_the_middle_keeps_order() {
        let mut queue = AdmissionQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(Entry(a));
        queue.enqueue(Entry(b));
        queue.enqueue(Entry(c));

        assert_eq!(queue.remove(b), Some(Entry(b)));
        assert_eq!(queue.remove(b), None);
        assert_eq!(queue.dequeue(), Some(Entry(a)));
        assert_eq!(queue.dequeue(), Some(Entry(c)));
    }
}
