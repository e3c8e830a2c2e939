// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only audit trail. Every recovery transition, alert change and
//! checkpoint operation is written to an [`AuditSink`] for postmortems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::{CheckpointEvent, HealthEvent, RecoveryEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stream", content = "event", rename_all = "snake_case")]
pub enum AuditRecord {
    Recovery(RecoveryEvent),
    Health(HealthEvent),
    Checkpoint(CheckpointEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub kind: String,
    pub record: AuditRecord,
}

impl AuditEntry {
    pub fn new(sequence: u64, record: AuditRecord) -> Self {
        let kind = match &record {
            AuditRecord::Recovery(e) => e.kind(),
            AuditRecord::Health(e) => e.kind(),
            AuditRecord::Checkpoint(e) => e.kind(),
        };
        Self {
            sequence,
            recorded_at: Utc::now(),
            kind: kind.to_string(),
            record,
        }
    }
}

/// Collaborator-provided destination for audit entries. `append` runs on the
/// recovery path and should return quickly.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry);
}
