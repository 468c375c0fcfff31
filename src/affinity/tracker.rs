//! Bounded query-id → backend map.
//!
//! # Responsibilities
//! - Remember which backend accepted each query
//! - Evict the oldest inserted query once `history_size` is reached
//!
//! # Design Decisions
//! - One mutex around a `HashMap` plus an insertion-order `VecDeque`;
//!   every operation is O(1) amortised and never held across `.await`
//! - Re-inserting an id refreshes its position; the stale queue slot is
//!   skipped on eviction and compacted away when the queue grows too long

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

/// A recorded routing decision for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityEntry {
    /// Name of the backend the query was sent to.
    pub backend: String,
    /// When the entry was (last) inserted.
    pub inserted_at: SystemTime,
}

#[derive(Debug)]
struct Slot {
    entry: AffinityEntry,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    /// Query ids in insertion order, tagged with the sequence number they
    /// were inserted with.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl Inner {
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((id, seq)) = self.order.pop_front() {
            let current = self.entries.get(&id).map(|slot| slot.seq);
            if current == Some(seq) {
                self.entries.remove(&id);
                return Some(id);
            }
        }
        None
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(id, seq)| entries.get(id).map(|slot| slot.seq) == Some(*seq));
    }
}

/// Thread-safe, fixed-capacity affinity store.
#[derive(Debug)]
pub struct QueryAffinityTracker {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl QueryAffinityTracker {
    /// Create a tracker holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Backend recorded for a query id.
    pub fn get(&self, query_id: &str) -> Option<AffinityEntry> {
        self.inner
            .lock()
            .entries
            .get(query_id)
            .map(|slot| slot.entry.clone())
    }

    /// Record that `query_id` runs on `backend`.
    pub fn put(&self, query_id: impl Into<String>, backend: impl Into<String>) {
        let query_id = query_id.into();
        let mut inner = self.inner.lock();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let slot = Slot {
            entry: AffinityEntry {
                backend: backend.into(),
                inserted_at: SystemTime::now(),
            },
            seq,
        };

        let is_new = inner.entries.insert(query_id.clone(), slot).is_none();
        inner.order.push_back((query_id, seq));

        if is_new && inner.entries.len() > self.capacity {
            if let Some(evicted) = inner.evict_oldest() {
                tracing::debug!(query_id = %evicted, capacity = self.capacity, "Evicted query affinity entry");
            }
        }
        if inner.order.len() > self.capacity * 2 {
            inner.compact();
        }
    }

    /// Forget a query id.
    pub fn remove(&self, query_id: &str) -> Option<AffinityEntry> {
        self.inner
            .lock()
            .entries
            .remove(query_id)
            .map(|slot| slot.entry)
    }

    /// Number of tracked queries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of tracked queries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
