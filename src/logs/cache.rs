use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A log cache shared between the output pump and readers
pub type SharedLogCache = Arc<Mutex<LogCache>>;

/// One captured output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, never reused for the lifetime of the cache
    pub seq: u64,
    pub line: String,
}

/// A run of consecutive entries around one search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Sequence number of the matching entry
    pub seq: u64,
    /// Position of the matching entry inside `lines`
    pub match_index: usize,
    pub lines: Vec<LogEntry>,
}

impl SearchMatch {
    pub fn matched(&self) -> Option<&LogEntry> {
        self.lines.get(self.match_index)
    }
}

/// Bounded, append-only line buffer for one service's combined output.
///
/// Once `capacity` entries are held, every append evicts the oldest entry.
/// Sequence numbers keep increasing across evictions, so a reader can tell
/// how much history was dropped by comparing the first retained `seq` with
/// what it saw before.
#[derive(Debug)]
pub struct LogCache {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
}

impl LogCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedLogCache {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Append one line and return its sequence number
    pub fn append(&mut self, line: impl Into<String>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            seq,
            line: line.into(),
        });

        seq
    }

    /// Up to `lines` entries ending `offset` entries before the newest.
    ///
    /// Both arguments are clamped to what is retained; an offset past the
    /// start of history yields an empty result.
    pub fn read(&self, lines: usize, offset: usize) -> Vec<LogEntry> {
        let end = self.entries.len().saturating_sub(offset);
        let start = end.saturating_sub(lines);
        self.entries.range(start..end).cloned().collect()
    }

    /// Case-insensitive substring search, oldest to newest.
    ///
    /// Returns the first `max_results` hits (not the best ones), each with up
    /// to `context_lines` neighbours on either side, clamped at the buffer
    /// edges. Windows of nearby hits may overlap.
    pub fn search(&self, pattern: &str, context_lines: usize, max_results: usize) -> Vec<SearchMatch> {
        let needle = pattern.to_lowercase();
        let mut results = Vec::new();

        if max_results == 0 {
            return results;
        }

        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.line.to_lowercase().contains(&needle) {
                continue;
            }

            let start = idx.saturating_sub(context_lines);
            let end = idx
                .saturating_add(context_lines)
                .saturating_add(1)
                .min(self.entries.len());

            results.push(SearchMatch {
                seq: entry.seq,
                match_index: idx - start,
                lines: self.entries.range(start..end).cloned().collect(),
            });

            if results.len() >= max_results {
                break;
            }
        }

        results
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

    /// Number of entries evicted so far
    pub fn dropped(&self) -> u64 {
        self.next_seq - self.entries.len() as u64
    }
}
