// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Checkpoints
//!
//! Opaque state snapshots keyed by a caller-chosen string. Stores are shared
//! across tasks but every operation touches a single key, so no multi-key
//! transactions exist.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub key: String,
    pub payload: Bytes,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(key: impl Into<String>, payload: Bytes) -> Self {
        Self {
            key: key.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("checkpoint `{0}` not found")]
    NotFound(String),
    #[error("checkpoint key must not be empty")]
    InvalidKey,
    #[error("checkpoint payload is {size} bytes, limit is {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// What happened to the store as a result of a `create`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateOutcome {
    pub replaced: bool,
    /// Key evicted to make room, if any.
    pub evicted: Option<String>,
}

pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite `key`, evicting the least recently used entry when
    /// the store is full.
    fn create(&self, key: &str, payload: Bytes) -> Result<CreateOutcome, CheckpointError>;

    /// Fetch the payload stored under `key` and mark it most recently used.
    fn rollback(&self, key: &str) -> Result<Checkpoint, CheckpointError>;

    fn remove(&self, key: &str) -> Option<Checkpoint>;

    /// Drop the least recently used entry.
    fn evict_lru(&self) -> Option<Checkpoint>;

    fn contains(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}
