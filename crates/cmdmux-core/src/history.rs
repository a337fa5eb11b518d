//! Fixed-capacity command history.
//!
//! Slots are allocated once; `push` writes to `count % capacity`, so the
//! oldest entry is overwritten once the ring is full and nothing is shifted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CommandId;

/// One executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command_id: CommandId,
    /// Command name as submitted
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Executor error, when the command failed instead of producing output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Ring buffer of the most recent `capacity` history entries
#[derive(Debug)]
pub struct RingHistoryBuffer {
    slots: Vec<Option<HistoryEntry>>,
    /// Total pushes since creation (or last clear)
    count: u64,
}

impl RingHistoryBuffer {
    /// Create a buffer holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, count: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count.min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of entries ever pushed, including overwritten ones
    pub fn total_pushed(&self) -> u64 {
        self.count
    }

    /// Append an entry, overwriting the oldest one when full. O(1).
    pub fn push(&mut self, entry: HistoryEntry) {
        let index = (self.count % self.slots.len() as u64) as usize;
        self.slots[index] = Some(entry);
        self.count += 1;
    }

    /// Iterate entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        let capacity = self.slots.len() as u64;
        let start = self.count.saturating_sub(capacity);
        (start..self.count).filter_map(move |n| self.slots[(n % capacity) as usize].as_ref())
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.iter().cloned().collect()
    }

    /// The `n` most recent entries, oldest first
    pub fn latest(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.count = 0;
    }
}

/// Truncate `text` to at most `max_len` characters.
///
/// Longer text keeps its first `max_len` characters followed by a note with
/// the number of characters removed.
pub fn truncate(text: &str, max_len: usize) -> String {
    let total = text.chars().count();
    if total <= max_len {
        return text.to_string();
    }

    let head: String = text.chars().take(max_len).collect();
    format!("{}\n... [{} characters truncated]", head, total - max_len)
}
