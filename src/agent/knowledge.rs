// Failure diagnostics carried across attempts and cycles.
// The log is owned by the caller and bounded: once full, the oldest entry is
// evicted. When feedback is enabled the most recent lessons are quoted back
// to the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::history::DiagnosticKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub recorded_at: DateTime<Utc>,
    pub cycle_id: Uuid,
    pub attempt_number: u32,
    pub kind: DiagnosticKind,
    pub lesson: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeLog {
    capacity: usize,
    entries: VecDeque<KnowledgeEntry>,
}

impl KnowledgeLog {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        KnowledgeLog {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, entry: KnowledgeEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.entries.iter()
    }

    /// Up to `limit` lessons, most recent first
    pub fn recent_lessons(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .take(limit)
            .map(|entry| format!("[{}] {}", entry.kind.as_str(), entry.lesson))
            .collect()
    }
}

impl Default for KnowledgeLog {
    fn default() -> Self {
        KnowledgeLog::new(crate::config::DEFAULT_KNOWLEDGE_CAPACITY)
    }
}
