// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{SnapKey, Snapshot};
use crate::key::Scheme;

use indexmap::IndexMap;
use std::sync::Arc;

/// Bounded LRU of computed snapshots.
///
/// Ordering lives in the map itself: front is the least recently used
/// entry, every hit moves the entry to the back.
pub struct SnapshotCache<S: Scheme> {
    capacity: usize,
    entries: IndexMap<SnapKey, Arc<Snapshot<S>>>,
}

impl<S: Scheme> SnapshotCache<S> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Returns snapshot and marks it as recently used.
    pub fn get(&mut self, key: &SnapKey) -> Option<Arc<Snapshot<S>>> {
        let snapshot = self.entries.shift_remove(key)?;
        self.entries.insert(*key, Arc::clone(&snapshot));

        Some(snapshot)
    }

    /// Lookup without touching the recency order.
    pub fn peek(&self, key: &SnapKey) -> Option<&Arc<Snapshot<S>>> {
        self.entries.get(key)
    }

    /// Inserts snapshot under its own key. Returns key of evicted entry if capacity is exceeded.
    pub fn insert(&mut self, snapshot: Arc<Snapshot<S>>) -> Option<SnapKey> {
        let key = snapshot.key();
        self.entries.shift_remove(&key);
        self.entries.insert(key, snapshot);

        if self.entries.len() > self.capacity {
            return self.entries.shift_remove_index(0).map(|(key, _)| key);
        }
        None
    }

    pub fn contains(&self, key: &SnapKey) -> bool {
        self.entries.contains_key(key)
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
