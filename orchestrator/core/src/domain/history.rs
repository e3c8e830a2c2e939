// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Report History
//!
//! Bounded arena of [`ReportRecord`]s. Records live in indexed slots with a
//! free list, so capacity is fixed by configuration and slots are reused
//! without reallocating. When full, the oldest *terminal* record is evicted;
//! records still being handled are never dropped.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::domain::error_report::ErrorId;
use crate::domain::recovery::ReportRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("report `{0}` is already retained")]
    Duplicate(ErrorId),
    #[error("history is full of reports still in flight")]
    Full,
}

#[derive(Debug)]
pub struct ReportHistory {
    slots: Vec<Option<ReportRecord>>,
    free: Vec<usize>,
    index: HashMap<ErrorId, usize>,
    /// Occupied slots, oldest first.
    order: VecDeque<usize>,
    capacity: usize,
}

impl ReportHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &ErrorId) -> bool {
        self.index.contains_key(id)
    }

    /// Store `record`, returning the record evicted to make room, if any.
    pub fn insert(&mut self, record: ReportRecord) -> Result<Option<ReportRecord>, HistoryError> {
        if self.index.contains_key(record.id()) {
            return Err(HistoryError::Duplicate(record.id().clone()));
        }

        let evicted = if self.len() >= self.capacity {
            Some(self.evict_oldest_terminal().ok_or(HistoryError::Full)?)
        } else {
            None
        };

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.index.insert(record.id().clone(), slot);
        self.slots[slot] = Some(record);
        self.order.push_back(slot);
        Ok(evicted)
    }

    fn evict_oldest_terminal(&mut self) -> Option<ReportRecord> {
        let pos = self.order.iter().position(|slot| {
            self.slots[*slot]
                .as_ref()
                .is_some_and(|record| record.is_terminal())
        })?;
        let slot = self.order.remove(pos)?;
        let record = self.slots[slot].take()?;
        self.index.remove(record.id());
        self.free.push(slot);
        Some(record)
    }

    pub fn get(&self, id: &ErrorId) -> Option<&ReportRecord> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: &ErrorId) -> Option<&mut ReportRecord> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_mut()
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ReportRecord> {
        self.order.iter().filter_map(|slot| self.slots[*slot].as_ref())
    }
}
