use hubcore::{HistoryEntry, RunId};
use std::collections::VecDeque;

/// Bounded retention of terminal runs; the oldest entry is evicted first.
#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Newest first, at most `limit` entries (all when `None`)
    pub fn recent(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let limit = limit.unwrap_or(self.entries.len());
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, run_id: RunId) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.run.id == run_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hubcore::{RunSnapshot, RunStatus};
    use uuid::Uuid;

    fn entry(name: &str) -> HistoryEntry {
        HistoryEntry::from(RunSnapshot {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            workflow_name: name.to_string(),
            status: RunStatus::Completed,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            duration_ms: Some(0),
            cancelled: false,
            error: None,
            error_kind: None,
            nodes: Vec::new(),
        })
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut history = HistoryStore::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            history.push(entry(name));
        }

        assert_eq!(history.len(), 3);
        let names: Vec<String> = history
            .recent(None)
            .into_iter()
            .map(|e| e.run.workflow_name)
            .collect();
        assert_eq!(names, vec!["e", "d", "c"]);
    }

    #[test]
    fn limit_returns_newest() {
        let mut history = HistoryStore::new(10);
        for name in ["a", "b", "c"] {
            history.push(entry(name));
        }

        let recent = history.recent(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run.workflow_name, "c");
        assert_eq!(recent[1].run.workflow_name, "b");
        assert!(history.recent(Some(0)).is_empty());
    }

    #[test]
    fn lookup_by_run_id() {
        let mut history = HistoryStore::new(2);
        let first = entry("a");
        let id = first.run.id;
        history.push(first);
        assert!(history.get(id).is_some());

        history.push(entry("b"));
        history.push(entry("c"));
        assert!(history.get(id).is_none());
    }
}
