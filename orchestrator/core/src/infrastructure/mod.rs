// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod checkpoint_store;
pub mod event_bus;
pub mod executors;

pub use audit::{CompositeAuditSink, InMemoryAuditSink, JsonLinesAuditSink, TracingAuditSink};
pub use checkpoint_store::InMemoryCheckpointStore;
pub use event_bus::{DomainEvent, EventBus, EventBusError, EventReceiver, RecoveryEventReceiver};
pub use executors::{CheckpointRollbackExecutor, ExecutorRegistry, FnExecutor, RestoreTarget};
