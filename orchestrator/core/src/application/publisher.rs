// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Publisher
//
// Single exit point for domain events: each event is appended to the audit
// sink with a monotonically increasing sequence number, then broadcast on the
// event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::audit::{AuditEntry, AuditRecord, AuditSink};
use crate::domain::events::{CheckpointEvent, HealthEvent, RecoveryEvent};
use crate::infrastructure::audit::TracingAuditSink;
use crate::infrastructure::event_bus::EventBus;

#[derive(Clone)]
pub struct EventPublisher {
    bus: EventBus,
    audit: Arc<dyn AuditSink>,
    sequence: Arc<AtomicU64>,
}

impl EventPublisher {
    pub fn new(bus: EventBus, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            bus,
            audit,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn audit(&self, record: AuditRecord) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.audit.append(&AuditEntry::new(sequence, record));
    }

    pub fn recovery(&self, event: RecoveryEvent) {
        self.audit(AuditRecord::Recovery(event.clone()));
        self.bus.publish_recovery_event(event);
    }

    pub fn health(&self, event: HealthEvent) {
        self.audit(AuditRecord::Health(event.clone()));
        self.bus.publish_health_event(event);
    }

    pub fn checkpoint(&self, event: CheckpointEvent) {
        self.audit(AuditRecord::Checkpoint(event.clone()));
        self.bus.publish_checkpoint_event(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EventBus::default(), Arc::new(TracingAuditSink))
    }
}
