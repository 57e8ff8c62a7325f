use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One output recorded in a [`SharedContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Position in the append order; never reused, even after eviction.
    pub seq: u64,
    pub source: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of outputs for a single coordination run.
///
/// Bounded by entry count and by characters per entry. Once full, the
/// oldest entries are evicted. Each run owns its own instance.
#[derive(Debug, Clone)]
pub struct SharedContext {
    entries: VecDeque<ContextEntry>,
    next_seq: u64,
    max_entries: usize,
    max_entry_chars: usize,
}

impl SharedContext {
    pub fn new(max_entries: usize, max_entry_chars: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            max_entries: max_entries.max(1),
            max_entry_chars,
        }
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&mut self, source: &str, text: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(ContextEntry {
            seq,
            source: source.to_string(),
            text: truncate_chars(text, self.max_entry_chars),
            timestamp: Utc::now(),
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        seq
    }

    /// Bumped by every append. Use it to mark the start of a phase.
    pub fn version(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    /// Retained entries appended before `version`.
    pub fn before(&self, version: u64) -> Vec<ContextEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq < version)
            .cloned()
            .collect()
    }

    /// Retained entries appended at or after `version`.
    pub fn since(&self, version: u64) -> Vec<ContextEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq >= version)
            .cloned()
            .collect()
    }
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut cut: String = text.chars().take(max - 1).collect();
    cut.push('…');
    cut
}
