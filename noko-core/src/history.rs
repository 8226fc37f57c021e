// ABOUTME: Bounded, ordered log of recent room messages used as LLM context.
// ABOUTME: Oldest entries are evicted first; snapshots are owned copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub text: String,
}

impl HistoryEntry {
    pub fn new(timestamp: DateTime<Utc>, actor: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            text: text.into(),
        }
    }

    /// `[HH:MM:SS]actor: text`
    pub fn format_line(&self) -> String {
        format!(
            "[{}]{}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.actor,
            self.text
        )
    }
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Owned copy of every entry, oldest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The most recent `n` entries, oldest first
    pub fn window(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Shrinks (dropping the oldest) or grows the buffer
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
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

    pub fn last_from(&self, actor: &str) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.actor == actor)
    }
}

/// Render entries as transcript lines, keeping only the latest copy of repeated text.
pub fn format_transcript(entries: &[HistoryEntry]) -> String {
    let mut seen = HashSet::new();
    let mut lines: Vec<String> = entries
        .iter()
        .rev()
        .filter(|e| seen.insert(e.text.as_str()))
        .map(HistoryEntry::format_line)
        .collect();
    lines.reverse();
    lines.join("\n")
}
