// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Checkpoint Store
//
// LRU-bounded map of checkpoint key -> payload. `rollback` counts as a use,
// so frequently restored checkpoints survive eviction.

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, info};

use crate::domain::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CreateOutcome};

pub struct InMemoryCheckpointStore {
    entries: Mutex<LruCache<String, Checkpoint>>,
    capacity: usize,
    max_payload_bytes: usize,
}

impl InMemoryCheckpointStore {
    pub fn new(capacity: usize, max_payload_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            max_payload_bytes,
        }
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn create(&self, key: &str, payload: Bytes) -> Result<CreateOutcome, CheckpointError> {
        if key.trim().is_empty() {
            return Err(CheckpointError::InvalidKey);
        }
        if payload.len() > self.max_payload_bytes {
            return Err(CheckpointError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_bytes,
            });
        }

        let size = payload.len();
        let mut entries = self.entries.lock();
        let outcome = match entries.push(key.to_string(), Checkpoint::new(key, payload)) {
            Some((old_key, _)) if old_key == key => CreateOutcome {
                replaced: true,
                evicted: None,
            },
            Some((evicted, _)) => {
                counter!("warden_checkpoint_evictions_total").increment(1);
                info!(key = %evicted, "Evicted least recently used checkpoint");
                CreateOutcome {
                    replaced: false,
                    evicted: Some(evicted),
                }
            }
            None => CreateOutcome::default(),
        };
        debug!(key, size, replaced = outcome.replaced, "Checkpoint stored");
        Ok(outcome)
    }

    fn rollback(&self, key: &str) -> Result<Checkpoint, CheckpointError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(key.to_string()))
    }

    fn remove(&self, key: &str) -> Option<Checkpoint> {
        self.entries.lock().pop(key)
    }

    fn evict_lru(&self) -> Option<Checkpoint> {
        let evicted = self.entries.lock().pop_lru().map(|(_, cp)| cp);
        if evicted.is_some() {
            counter!("warden_checkpoint_evictions_total").increment(1);
        }
        evicted
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
