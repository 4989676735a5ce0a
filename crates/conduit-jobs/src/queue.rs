use crate::job::JobPriority;
use std::collections::VecDeque;

/// Pending job ids, ordered by priority then admission order
#[derive(Debug, Clone, Default)]
pub struct PriorityQueue {
    entries: VecDeque<(String, JobPriority)>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a job id ahead of the first entry with strictly lower priority.
    ///
    /// Entries of equal or higher priority keep their place, so jobs of the
    /// same class come out in FIFO order.
    pub fn admit(&mut self, id: String, priority: JobPriority) {
        let pos = self
            .entries
            .iter()
            .position(|(_, queued)| *queued < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (id, priority));
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.entries.pop_front().map(|(id, _)| id)
    }

    /// Remove an id wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.iter().position(|(queued, _)| queued == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(queued, _)| queued == id)
    }

    /// Ids in dispatch order.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
