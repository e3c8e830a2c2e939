// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator
//!
//! The context object a host creates once at startup. It wires the health
//! aggregator, recovery coordinator, checkpoint store, event bus and audit
//! sinks from a single [`WardenConfigManifest`] and exposes the operations
//! agents and operators call.
//!
//! Several independent instances can live in one process; nothing here is
//! global.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use warden_core::application::orchestrator::Orchestrator;
//! use warden_core::domain::config::WardenConfigManifest;
//!
//! let warden = Orchestrator::builder(WardenConfigManifest::default()).build()?;
//! warden.start();
//! // ... submit reports and samples ...
//! warden.shutdown().await;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::analytics::{AnalyticsCollector, AnalyticsSnapshot};
use crate::application::health_aggregator::HealthAggregator;
use crate::application::publisher::EventPublisher;
use crate::application::recovery_coordinator::{
    CoordinatorServices, IngestError, RecoveryCoordinator, RecoveryRequestError,
};
use crate::domain::agent::AgentId;
use crate::domain::alert::{Alert, AlertError, AlertFilter, AlertId, AlertThresholds};
use crate::domain::audit::AuditSink;
use crate::domain::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CreateOutcome};
use crate::domain::classifier::ErrorClassifier;
use crate::domain::config::WardenConfigManifest;
use crate::domain::error_report::{ErrorId, ErrorReport, ValidationError};
use crate::domain::events::CheckpointEvent;
use crate::domain::executor::StrategyExecutor;
use crate::domain::health::{AgentHealthState, HealthStatus, Metric, SystemHealth};
use crate::domain::predictor::{FailurePredictor, HeuristicPredictor};
use crate::domain::recovery::{RecoveryStrategy, ReportRecord, TerminalState};
use crate::infrastructure::audit::{CompositeAuditSink, JsonLinesAuditSink, TracingAuditSink};
use crate::infrastructure::checkpoint_store::InMemoryCheckpointStore;
use crate::infrastructure::event_bus::{EventBus, EventReceiver, RecoveryEventReceiver};
use crate::infrastructure::executors::{CheckpointRollbackExecutor, ExecutorRegistry, RestoreTarget};

pub struct OrchestratorBuilder {
    config: WardenConfigManifest,
    executors: ExecutorRegistry,
    predictor: Option<Arc<dyn FailurePredictor>>,
    audit: Option<Arc<dyn AuditSink>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    restore_target: Option<Arc<dyn RestoreTarget>>,
}

impl OrchestratorBuilder {
    pub fn with_executor(self, strategy: RecoveryStrategy, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.executors.register(strategy, executor);
        self
    }

    /// Use one executor for every strategy without a dedicated one.
    pub fn with_default_executor(self, executor: Arc<dyn StrategyExecutor>) -> Self {
        for strategy in RecoveryStrategy::ALL {
            if !strategy.is_escalation() && !self.executors.contains(strategy) {
                self.executors.register(strategy, executor.clone());
            }
        }
        self
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn FailurePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Audit sink receiving every event. Defaults to the tracing sink; a
    /// configured `audit_log_path` is written in addition.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Serve `rollback` from the checkpoint store, restoring into `target`.
    pub fn with_restore_target(mut self, target: Arc<dyn RestoreTarget>) -> Self {
        self.restore_target = Some(target);
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        self.config.validate()?;
        let spec = &self.config.spec;

        let mut audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let audit_file = match &spec.observability.audit_log_path {
            Some(path) => Some(Arc::new(JsonLinesAuditSink::open(
                path,
                spec.observability.audit_queue_capacity,
            )?)),
            None => None,
        };
        if let Some(file) = &audit_file {
            audit = Arc::new(CompositeAuditSink::new().with(audit).with(file.clone()));
        }

        let bus = EventBus::new(spec.observability.event_bus_capacity);
        let publisher = EventPublisher::new(bus, audit);
        let health = Arc::new(HealthAggregator::new(spec.health.clone(), publisher.clone()));
        let analytics = Arc::new(AnalyticsCollector::new());
        let checkpoints = self.checkpoints.unwrap_or_else(|| {
            Arc::new(InMemoryCheckpointStore::new(
                spec.checkpoints.capacity,
                spec.checkpoints.max_payload_bytes,
            ))
        });

        if let Some(target) = self.restore_target {
            self.executors.register(
                RecoveryStrategy::Rollback,
                Arc::new(CheckpointRollbackExecutor::new(checkpoints.clone(), target)),
            );
        }
        let executors = Arc::new(self.executors);

        let predictor = self.predictor.unwrap_or_else(|| {
            Arc::new(HeuristicPredictor::new(spec.recovery.prediction_threshold))
        });

        let coordinator = Arc::new(RecoveryCoordinator::new(
            spec.recovery.clone(),
            spec.ingestion.clone(),
            CoordinatorServices {
                classifier: ErrorClassifier::new(spec.classifier.max_memory_bytes),
                predictor,
                executors: executors.clone(),
                health: health.clone(),
                analytics: analytics.clone(),
                publisher: publisher.clone(),
            },
        ));

        info!(
            name = %self.config.metadata.name,
            max_parallel = spec.recovery.max_parallel_recoveries,
            max_attempts = spec.recovery.max_recovery_attempts,
            "Warden orchestrator configured"
        );

        Ok(Orchestrator {
            config: self.config,
            publisher,
            health,
            analytics,
            coordinator,
            checkpoints,
            executors,
            tasks: Mutex::new(Vec::new()),
            audit_file,
            audit_writer: Mutex::new(None),
            audit_shutdown: CancellationToken::new(),
        })
    }
}

pub struct Orchestrator {
    config: WardenConfigManifest,
    publisher: EventPublisher,
    health: Arc<HealthAggregator>,
    analytics: Arc<AnalyticsCollector>,
    coordinator: Arc<RecoveryCoordinator>,
    checkpoints: Arc<dyn CheckpointStore>,
    executors: Arc<ExecutorRegistry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    audit_file: Option<Arc<JsonLinesAuditSink>>,
    audit_writer: Mutex<Option<JoinHandle<()>>>,
    audit_shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn builder(config: WardenConfigManifest) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            executors: ExecutorRegistry::new(),
            predictor: None,
            audit: None,
            checkpoints: None,
            restore_target: None,
        }
    }

    pub fn config(&self) -> &WardenConfigManifest {
        &self.config
    }

    /// Spawn the recovery dispatcher, the heartbeat sweeper and the audit
    /// file writer. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(dispatcher) = self.coordinator.start() else {
            return;
        };
        let mut tasks = self.tasks.lock();
        tasks.push(dispatcher);
        tasks.push(self.spawn_heartbeat_sweeper());
        *self.audit_writer.lock() = self.start_audit_writer();
        info!("Warden orchestrator started");
    }

    fn start_audit_writer(&self) -> Option<JoinHandle<()>> {
        self.audit_file
            .as_ref()
            .and_then(|file| file.start(self.audit_shutdown.clone()))
    }

    fn spawn_heartbeat_sweeper(&self) -> JoinHandle<()> {
        let health = self.health.clone();
        let shutdown = self.coordinator.shutdown_token();
        let period = self.config.spec.health.heartbeat_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let failed = health.sweep_heartbeats(Utc::now());
                        if !failed.is_empty() {
                            debug!(count = failed.len(), "Heartbeat sweep marked agents failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop the background tasks. Queued reports end `Abandoned`.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        // Last, so the abandon events above still reach the audit file.
        let writer = self.audit_writer.lock().take();
        let writer = writer.or_else(|| self.start_audit_writer());
        self.audit_shutdown.cancel();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!("Audit writer ended abnormally: {}", e);
            }
        }
        info!("Warden orchestrator stopped");
    }

    /// Audit entries the file writer could not keep up with.
    pub fn audit_entries_dropped(&self) -> u64 {
        self.audit_file.as_ref().map_or(0, |file| file.dropped())
    }

    // --- ingestion ---------------------------------------------------------

    pub fn submit_error_report(&self, report: ErrorReport) -> Result<ErrorId, IngestError> {
        self.coordinator.submit(report)
    }

    pub fn submit_health_sample(
        &self,
        agent_id: &AgentId,
        metric: Metric,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<HealthStatus, ValidationError> {
        self.health.record_sample(agent_id, metric, value, timestamp)
    }

    pub fn heartbeat(&self, agent_id: &AgentId) {
        self.health.heartbeat(agent_id, Utc::now());
    }

    pub fn register_executor(&self, strategy: RecoveryStrategy, executor: Arc<dyn StrategyExecutor>) {
        self.executors.register(strategy, executor);
    }

    // --- queries -----------------------------------------------------------

    pub fn get_analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn get_agent_health(&self, agent_id: &AgentId) -> Option<AgentHealthState> {
        self.health.status_of(agent_id)
    }

    pub fn list_open_alerts(&self) -> Vec<Alert> {
        self.health.open_alerts()
    }

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.health.alerts(filter)
    }

    pub fn system_health(&self) -> SystemHealth {
        self.health.system_health()
    }

    pub fn report(&self, error_id: &ErrorId) -> Option<ReportRecord> {
        self.coordinator.report(error_id)
    }

    pub async fn wait_for_terminal(&self, error_id: &ErrorId, timeout: Duration) -> Option<TerminalState> {
        self.coordinator.wait_for_terminal(error_id, timeout).await
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.publisher.bus().subscribe()
    }

    pub fn subscribe_error(&self, error_id: ErrorId) -> RecoveryEventReceiver {
        self.publisher.bus().subscribe_error(error_id)
    }

    // --- operator actions --------------------------------------------------

    pub fn acknowledge_alert(&self, alert_id: &AlertId) -> Result<Alert, AlertError> {
        self.health.acknowledge_alert(alert_id)
    }

    pub fn set_agent_thresholds(
        &self,
        agent_id: &AgentId,
        metric: Metric,
        thresholds: AlertThresholds,
    ) -> Result<(), AlertError> {
        self.health.set_agent_thresholds(agent_id, metric, thresholds)
    }

    pub fn clear_agent_thresholds(&self, agent_id: &AgentId, metric: Metric) -> Option<AlertThresholds> {
        self.health.clear_agent_thresholds(agent_id, metric)
    }

    pub fn request_manual_recovery(
        &self,
        error_id: &ErrorId,
        strategy: RecoveryStrategy,
    ) -> Result<(), RecoveryRequestError> {
        self.coordinator.request_manual_recovery(error_id, strategy)
    }

    pub fn create_checkpoint(&self, key: &str, payload: Bytes) -> Result<CreateOutcome, CheckpointError> {
        let size_bytes = payload.len();
        let outcome = self.checkpoints.create(key, payload)?;
        let now = Utc::now();
        info!(key, size_bytes, replaced = outcome.replaced, "Checkpoint created");
        if let Some(evicted) = &outcome.evicted {
            info!(key = %evicted, "Checkpoint evicted");
            self.publisher.checkpoint(CheckpointEvent::CheckpointEvicted {
                key: evicted.clone(),
                evicted_at: now,
            });
        }
        self.publisher.checkpoint(CheckpointEvent::CheckpointCreated {
            key: key.to_string(),
            size_bytes,
            replaced: outcome.replaced,
            created_at: now,
        });
        Ok(outcome)
    }

    pub fn rollback_to_checkpoint(&self, key: &str) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.checkpoints.rollback(key)?;
        info!(key, size_bytes = checkpoint.size(), "Checkpoint restored");
        self.publisher.checkpoint(CheckpointEvent::CheckpointRestored {
            key: key.to_string(),
            size_bytes: checkpoint.size(),
            restored_at: Utc::now(),
        });
        Ok(checkpoint)
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Lets the background tasks exit if shutdown() was never awaited.
        self.coordinator.shutdown_token().cancel();
        self.audit_shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::CheckpointEvent;
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::event_bus::DomainEvent;

    fn config() -> WardenConfigManifest {
        let mut config = WardenConfigManifest::default();
        config.spec.checkpoints.capacity = 2;
        config
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut bad = config();
        bad.spec.recovery.max_parallel_recoveries = 0;
        assert!(Orchestrator::builder(bad).build().is_err());
    }

    #[test]
    fn test_checkpoint_lifecycle_emits_events() {
        let audit = Arc::new(InMemoryAuditSink::new(64));
        let warden = Orchestrator::builder(config())
            .with_audit_sink(audit.clone())
            .build()
            .unwrap();
        let mut rx = warden.subscribe();

        warden.create_checkpoint("a", Bytes::from_static(b"1")).unwrap();
        warden.create_checkpoint("b", Bytes::from_static(b"2")).unwrap();
        let outcome = warden.create_checkpoint("c", Bytes::from_static(b"3")).unwrap();
        assert_eq!(outcome.evicted.as_deref(), Some("a"));

        assert_eq!(
            warden.rollback_to_checkpoint("a"),
            Err(CheckpointError::NotFound("a".to_string()))
        );
        assert_eq!(
            warden.rollback_to_checkpoint("c").unwrap().payload,
            Bytes::from_static(b"3")
        );

        let mut kinds = Vec::new();
        while let Ok(DomainEvent::Checkpoint(event)) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "checkpoint_created",
                "checkpoint_created",
                "checkpoint_evicted",
                "checkpoint_created",
                "checkpoint_restored",
            ]
        );
        assert_eq!(audit.len(), 5);
        assert!(matches!(
            audit.entries()[2].record,
            crate::domain::audit::AuditRecord::Checkpoint(CheckpointEvent::CheckpointEvicted { .. })
        ));
    }

    #[tokio::test]
    async fn test_configured_audit_log_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut config = config();
        config.spec.observability.audit_log_path = Some(path.clone());
        let warden = Orchestrator::builder(config).build().unwrap();
        warden.start();

        warden.create_checkpoint("k", Bytes::from_static(b"state")).unwrap();
        warden.shutdown().await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("checkpoint_created"));
    }

    #[tokio::test]
    async fn test_stalled_audit_writer_does_not_hold_up_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut config = config();
        config.spec.observability.audit_log_path = Some(path.clone());
        config.spec.observability.audit_queue_capacity = 1;
        // Not started: the audit writer never drains.
        let warden = Orchestrator::builder(config).build().unwrap();

        let agent = AgentId::new("a1");
        for _ in 0..5 {
            warden
                .submit_health_sample(&agent, Metric::CpuUsage, 10.0, Utc::now())
                .unwrap();
        }
        for _ in 0..3 {
            let report = ErrorReport::new(
                "a1",
                crate::domain::agent::AgentRole::Runtime,
                crate::domain::error_report::Severity::Error,
                crate::domain::error_report::ErrorCategory::Network,
                "connection reset",
            );
            warden.submit_error_report(report).unwrap();
        }
        assert!(warden.audit_entries_dropped() >= 2);

        warden.shutdown().await;
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_health_queries_delegate() {
        let warden = Orchestrator::builder(config()).build().unwrap();
        let agent = AgentId::new("a1");
        assert!(warden.get_agent_health(&agent).is_none());
        assert_eq!(
            warden.submit_health_sample(&agent, Metric::CpuUsage, 10.0, Utc::now()),
            Ok(HealthStatus::Good)
        );
        assert_eq!(warden.get_agent_health(&agent).unwrap().status, HealthStatus::Good);
        assert!(warden.list_open_alerts().is_empty());
        assert_eq!(warden.system_health().agents, 1);
    }
}
