// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod analytics;
pub mod health_aggregator;
pub mod orchestrator;
pub mod publisher;
pub mod recovery_coordinator;

// Re-export services for convenience
pub use analytics::{AnalyticsCollector, AnalyticsSnapshot, RecoveryTimeStats, StrategyStats};
pub use health_aggregator::HealthAggregator;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use publisher::EventPublisher;
pub use recovery_coordinator::{
    CoordinatorServices, IngestError, RecoveryCoordinator, RecoveryRequestError,
};
