// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Recovery Coordinator
//!
//! Drives every ingested [`ErrorReport`] from `Received` to a terminal state.
//!
//! ```text
//! submit ──try_reserve──► queue ──► dispatcher ──classify/predict/select──► permit ──► attempt loop
//!   │                                   │                                                 │
//!   └─ validate, history, error rate     └─ below min severity → Abandoned                └─ Resolved / Escalated
//! ```
//!
//! ## Guarantees
//! - Submission never blocks: a full queue is reported as [`IngestError::QueueFull`].
//! - Attempts for one report run strictly one after another.
//! - At most `max_parallel_recoveries` attempts execute at once. The semaphore is
//!   fair, so waiting attempts are served in arrival order.
//! - An attempt with no outcome by its deadline is recorded as `TimedOut`. The
//!   executor task is detached and its late result discarded.
//! - No report exceeds `max_recovery_attempts`; the would-be next attempt
//!   yields `Escalated` instead.

use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::analytics::AnalyticsCollector;
use crate::application::health_aggregator::HealthAggregator;
use crate::application::publisher::EventPublisher;
use crate::domain::classifier::{ErrorClassifier, FeatureVector};
use crate::domain::config::{IngestionConfig, RecoveryConfig};
use crate::domain::error_report::{ErrorId, ErrorReport, Severity, ValidationError};
use crate::domain::events::RecoveryEvent;
use crate::domain::executor::ExecutionOutcome;
use crate::domain::history::{HistoryError, ReportHistory};
use crate::domain::predictor::FailurePredictor;
use crate::domain::recovery::{
    select_strategy, AttemptOutcome, RecoveryAttempt, RecoveryError, RecoveryStrategy,
    ReportRecord, SelectionReason, TerminalState,
};
use crate::infrastructure::executors::ExecutorRegistry;

const SHUTDOWN_REASON: &str = "shutdown";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("invalid error report: {0}")]
    Invalid(#[from] ValidationError),
    #[error("report `{0}` was already submitted")]
    DuplicateErrorId(ErrorId),
    #[error("ingestion queue is full")]
    QueueFull,
    #[error("report history is full of reports still in flight")]
    HistoryFull,
    #[error("coordinator is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryRequestError {
    #[error("no retained report with id `{0}`")]
    UnknownError(ErrorId),
    #[error("report `{0}` is still being handled")]
    InProgress(ErrorId),
    #[error("report has used all {max} recovery attempts")]
    AttemptsExhausted { max: u32 },
    #[error("coordinator is shutting down")]
    ShuttingDown,
}

/// Collaborators the coordinator drives.
pub struct CoordinatorServices {
    pub classifier: ErrorClassifier,
    pub predictor: Arc<dyn FailurePredictor>,
    pub executors: Arc<ExecutorRegistry>,
    pub health: Arc<HealthAggregator>,
    pub analytics: Arc<AnalyticsCollector>,
    pub publisher: EventPublisher,
}

enum Step {
    Run(RecoveryAttempt, ErrorReport),
    Exhausted(u32),
    Stop,
}

pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    max_context_len: usize,
    history: Mutex<ReportHistory>,
    services: CoordinatorServices,
    permits: Arc<Semaphore>,
    sender: mpsc::Sender<ErrorId>,
    receiver: Mutex<Option<mpsc::Receiver<ErrorId>>>,
    waiters: DashMap<ErrorId, Arc<Notify>>,
    shutdown: CancellationToken,
}

impl RecoveryCoordinator {
    pub fn new(config: RecoveryConfig, ingestion: IngestionConfig, services: CoordinatorServices) -> Self {
        let (sender, receiver) = mpsc::channel(ingestion.queue_capacity.max(1));
        Self {
            permits: Arc::new(Semaphore::new(config.max_parallel_recoveries.max(1))),
            config,
            max_context_len: ingestion.max_context_len,
            history: Mutex::new(ReportHistory::new(ingestion.history_capacity)),
            services,
            sender,
            receiver: Mutex::new(Some(receiver)),
            waiters: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the dispatcher. Returns `None` if it was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let receiver = self.receiver.lock().take()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.dispatch_loop(receiver).await }))
    }

    /// Stop accepting work. Queued reports, and attempts still waiting for a
    /// permit, end `Abandoned`.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Recovery coordinator shutting down");
        self.shutdown.cancel();
        self.drain_unstarted();
    }

    /// Validate and enqueue a report. Never blocks.
    pub fn submit(&self, report: ErrorReport) -> Result<ErrorId, IngestError> {
        if self.shutdown.is_cancelled() {
            return Err(IngestError::ShuttingDown);
        }
        report.validate(self.max_context_len)?;

        let slot = self.sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => IngestError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => IngestError::ShuttingDown,
        })?;

        let id = report.id.clone();
        let event = RecoveryEvent::ErrorReceived {
            error_id: id.clone(),
            agent_id: report.agent_id.clone(),
            category: report.category,
            severity: report.severity,
            received_at: Utc::now(),
        };
        let agent_id = report.agent_id.clone();

        {
            let mut history = self.history.lock();
            match history.insert(ReportRecord::new(report, self.config.max_recovery_attempts)) {
                Ok(Some(evicted)) => {
                    debug!(error_id = %evicted.id(), "Evicted terminal report from history")
                }
                Ok(None) => {}
                Err(HistoryError::Duplicate(id)) => return Err(IngestError::DuplicateErrorId(id)),
                Err(HistoryError::Full) => return Err(IngestError::HistoryFull),
            }
        }

        self.services.health.record_error(&agent_id, Utc::now());
        self.services.publisher.recovery(event);
        slot.send(id.clone());
        if self.shutdown.is_cancelled() {
            // Raced with shutdown before the dispatcher was started.
            self.drain_unstarted();
        }
        Ok(id)
    }

    /// Operator override: run `strategy` on a terminal report, skipping
    /// prediction. Must be called from within a tokio runtime.
    pub fn request_manual_recovery(
        self: &Arc<Self>,
        error_id: &ErrorId,
        strategy: RecoveryStrategy,
    ) -> Result<(), RecoveryRequestError> {
        if self.shutdown.is_cancelled() {
            return Err(RecoveryRequestError::ShuttingDown);
        }

        let (report, attempt_number) = {
            let mut history = self.history.lock();
            let record = history
                .get_mut(error_id)
                .ok_or_else(|| RecoveryRequestError::UnknownError(error_id.clone()))?;
            if !record.is_terminal() {
                return Err(RecoveryRequestError::InProgress(error_id.clone()));
            }
            record
                .reopen()
                .map_err(|_| RecoveryRequestError::AttemptsExhausted {
                    max: record.max_attempts,
                })?;
            (record.report.clone(), record.attempts().len() as u32 + 1)
        };

        info!(error_id = %error_id, strategy = %strategy, "Manual recovery requested");
        self.services.analytics.record_manual();
        let now = Utc::now();
        self.services.publisher.recovery(RecoveryEvent::ManualRecoveryRequested {
            error_id: error_id.clone(),
            agent_id: report.agent_id.clone(),
            strategy,
            requested_at: now,
        });
        self.services.publisher.recovery(RecoveryEvent::StrategySelected {
            error_id: error_id.clone(),
            agent_id: report.agent_id.clone(),
            strategy,
            reason: SelectionReason::Manual,
            attempt_number,
            selected_at: now,
        });

        let health = self.services.health.status_of(&report.agent_id);
        let features = self.services.classifier.classify(&report, health.as_ref()).features;
        let this = Arc::clone(self);
        let id = error_id.clone();
        tokio::spawn(async move { this.run_attempts(id, strategy, features, true, None).await });
        Ok(())
    }

    /// Copy of a retained report and its attempts.
    pub fn report(&self, error_id: &ErrorId) -> Option<ReportRecord> {
        self.history.lock().get(error_id).cloned()
    }

    pub fn terminal_state(&self, error_id: &ErrorId) -> Option<TerminalState> {
        self.history.lock().get(error_id).and_then(|r| r.terminal_state())
    }

    pub fn retained_reports(&self) -> usize {
        self.history.lock().len()
    }

    /// Wait until the report is terminal. `None` if it is unknown or still
    /// running when `timeout` elapses.
    pub async fn wait_for_terminal(&self, error_id: &ErrorId, timeout: Duration) -> Option<TerminalState> {
        let deadline = tokio::time::Instant::now() + timeout;
        let outcome = loop {
            let notify = self
                .waiters
                .entry(error_id.clone())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.history.lock().get(error_id).map(|r| r.terminal_state());
            match state {
                None => break None,
                Some(Some(state)) => break Some(state),
                Some(None) => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break self.terminal_state(error_id);
            }
        };
        // Only the map's own handle left: no other caller is waiting.
        self.waiters
            .remove_if(error_id, |_, notify| Arc::strong_count(notify) == 1);
        outcome
    }

    /// Callers currently blocked in [`Self::wait_for_terminal`], by report.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    async fn dispatch_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<ErrorId>) {
        info!(
            max_parallel = self.config.max_parallel_recoveries,
            "Recovery dispatcher started"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(id) => self.dispatch(id).await,
                    None => break,
                },
            }
        }
        self.drain(receiver).await;
        info!("Recovery dispatcher stopped");
    }

    /// Abandon everything still queued. `recv` only yields `None` once every
    /// reserved slot has been sent or released.
    async fn drain(&self, mut receiver: mpsc::Receiver<ErrorId>) {
        receiver.close();
        while let Some(id) = receiver.recv().await {
            self.finish(&id, TerminalState::Abandoned, SHUTDOWN_REASON);
        }
    }

    /// Shutdown without a dispatcher: the receiver stays parked, closed, so a
    /// submit holding a reserved slot can still land and be abandoned here.
    fn drain_unstarted(&self) {
        let queued = {
            let mut guard = self.receiver.lock();
            let Some(receiver) = guard.as_mut() else {
                return;
            };
            receiver.close();
            let mut queued = Vec::new();
            while let Ok(id) = receiver.try_recv() {
                queued.push(id);
            }
            queued
        };
        for id in queued {
            self.finish(&id, TerminalState::Abandoned, SHUTDOWN_REASON);
        }
    }

    async fn dispatch(self: &Arc<Self>, id: ErrorId) {
        let Some((strategy, features)) = self.prepare(&id) else {
            return;
        };
        if strategy.is_escalation() {
            self.finish(&id, TerminalState::Escalated, "escalate selected");
            return;
        }
        // Taking the first permit here keeps first attempts in arrival order.
        let Some(permit) = self.acquire().await else {
            self.finish(&id, TerminalState::Abandoned, SHUTDOWN_REASON);
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_attempts(id, strategy, features, false, Some(permit)).await
        });
    }

    /// Classify, predict and select the first strategy. `None` when the report
    /// is terminal already.
    fn prepare(&self, id: &ErrorId) -> Option<(RecoveryStrategy, FeatureVector)> {
        let report = self.history.lock().get(id)?.report.clone();
        let services = &self.services;
        let health = services.health.status_of(&report.agent_id);
        let classification = services.classifier.classify(&report, health.as_ref());
        let category = classification.category;

        services.analytics.record_error(&report, category);
        counter!(
            "warden_errors_received_total",
            "category" => category.as_str(),
            "severity" => report.severity.as_str()
        )
        .increment(1);
        services.publisher.recovery(RecoveryEvent::ErrorClassified {
            error_id: id.clone(),
            agent_id: report.agent_id.clone(),
            category,
            inferred: classification.inferred,
            classified_at: Utc::now(),
        });

        let eligible = report.severity >= self.config.auto_recovery_min_severity;
        let threshold = self.config.prediction_threshold;
        // Critical reports never wait on the predictor.
        let prediction = if eligible && report.severity < Severity::Critical {
            let error_rate = health.as_ref().map_or(0.0, |h| h.recent_error_rate);
            let prediction = services.predictor.predict(&classification.features, error_rate);
            services.analytics.record_prediction(prediction.confidence > threshold);
            services.publisher.recovery(RecoveryEvent::PredictionGenerated {
                error_id: id.clone(),
                agent_id: report.agent_id.clone(),
                predictor: services.predictor.name().to_string(),
                confidence: prediction.confidence,
                recommended_strategy: prediction.recommended_strategy,
                generated_at: Utc::now(),
            });
            Some(prediction)
        } else {
            None
        };

        if let Some(record) = self.history.lock().get_mut(id) {
            record.classify(prediction.clone());
        }

        if !eligible {
            self.finish(id, TerminalState::Abandoned, "below auto-recovery threshold");
            return None;
        }

        let (strategy, reason) =
            select_strategy(report.severity, category, prediction.as_ref(), threshold);
        if let Some(record) = self.history.lock().get_mut(id) {
            record.select_strategy();
        }
        debug!(error_id = %id, strategy = %strategy, reason = ?reason, "Strategy selected");
        services.publisher.recovery(RecoveryEvent::StrategySelected {
            error_id: id.clone(),
            agent_id: report.agent_id.clone(),
            strategy,
            reason,
            attempt_number: 1,
            selected_at: Utc::now(),
        });
        Some((strategy, classification.features))
    }

    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        }
    }

    async fn run_attempts(
        self: Arc<Self>,
        id: ErrorId,
        mut strategy: RecoveryStrategy,
        features: FeatureVector,
        mut manual: bool,
        mut permit: Option<OwnedSemaphorePermit>,
    ) {
        loop {
            if strategy.is_escalation() {
                self.finish(&id, TerminalState::Escalated, "escalation ladder reached escalate");
                return;
            }

            let permit = match permit.take() {
                Some(permit) => permit,
                None => match self.acquire().await {
                    Some(permit) => permit,
                    None => {
                        self.finish(&id, TerminalState::Abandoned, SHUTDOWN_REASON);
                        return;
                    }
                },
            };

            let timeout = self.config.timeout_for(strategy);
            let step = {
                let mut history = self.history.lock();
                match history.get_mut(&id) {
                    None => Step::Stop,
                    Some(record) => match record.start_attempt(strategy, timeout, manual) {
                        Ok(attempt) => {
                            let attempt = attempt.clone();
                            Step::Run(attempt, record.report.clone())
                        }
                        Err(RecoveryError::AttemptsExhausted { max }) => Step::Exhausted(max),
                        Err(e) => {
                            warn!(error_id = %id, "Cannot start recovery attempt: {}", e);
                            Step::Stop
                        }
                    },
                }
            };
            let (attempt, report) = match step {
                Step::Run(attempt, report) => (attempt, report),
                Step::Exhausted(max) => {
                    drop(permit);
                    self.finish(
                        &id,
                        TerminalState::Escalated,
                        format!("all {max} recovery attempts used"),
                    );
                    return;
                }
                Step::Stop => return,
            };
            manual = false;

            let services = &self.services;
            services.publisher.recovery(RecoveryEvent::AttemptStarted {
                error_id: id.clone(),
                agent_id: report.agent_id.clone(),
                strategy,
                attempt_number: attempt.attempt_number,
                deadline: attempt.deadline,
                started_at: attempt.started_at,
            });
            let in_flight = services.analytics.attempt_started(strategy);
            gauge!("warden_recoveries_in_flight").set(in_flight as f64);
            debug!(
                error_id = %id,
                strategy = %strategy,
                attempt = attempt.attempt_number,
                in_flight,
                "Recovery attempt started"
            );

            let started = Instant::now();
            let (outcome, detail) = self.execute(&report, &attempt, timeout).await;
            let elapsed = started.elapsed();

            // Release the in-flight slot before the permit so the count never
            // exceeds the bound.
            services.analytics.attempt_finished(strategy, outcome);
            gauge!("warden_recoveries_in_flight").set(services.analytics.in_flight() as f64);
            drop(permit);

            counter!(
                "warden_recovery_attempts_total",
                "strategy" => strategy.as_str(),
                "outcome" => outcome.as_str()
            )
            .increment(1);
            histogram!("warden_recovery_duration_seconds", "strategy" => strategy.as_str())
                .record(elapsed.as_secs_f64());

            let remaining = {
                let mut history = self.history.lock();
                match history.get_mut(&id) {
                    Some(record) => {
                        if let Err(e) = record.settle_attempt(outcome, elapsed, detail.clone()) {
                            warn!(error_id = %id, "Cannot settle recovery attempt: {}", e);
                        }
                        Some(record.attempts_remaining())
                    }
                    None => None,
                }
            };

            services.publisher.recovery(RecoveryEvent::AttemptCompleted {
                error_id: id.clone(),
                agent_id: report.agent_id.clone(),
                strategy,
                attempt_number: attempt.attempt_number,
                outcome,
                duration_ms: elapsed.as_millis() as u64,
                detail: detail.clone(),
                completed_at: Utc::now(),
            });

            let succeeded = outcome == AttemptOutcome::Succeeded;
            services.health.record_outcome(&report.agent_id, succeeded);
            services.predictor.record_outcome(&features, strategy, succeeded);

            if succeeded {
                self.finish(&id, TerminalState::Resolved, format!("{strategy} succeeded"));
                return;
            }
            debug!(
                error_id = %id,
                strategy = %strategy,
                outcome = %outcome,
                detail = detail.as_deref().unwrap_or(""),
                "Recovery attempt did not succeed"
            );

            match remaining {
                None => return,
                Some(0) => {
                    self.finish(
                        &id,
                        TerminalState::Escalated,
                        format!("all {} recovery attempts used", self.config.max_recovery_attempts),
                    );
                    return;
                }
                Some(_) => {}
            }

            strategy = self.config.escalation_ladder.next(strategy);
            services.publisher.recovery(RecoveryEvent::StrategySelected {
                error_id: id.clone(),
                agent_id: report.agent_id.clone(),
                strategy,
                reason: SelectionReason::Escalation,
                attempt_number: attempt.attempt_number + 1,
                selected_at: Utc::now(),
            });
        }
    }

    async fn execute(
        &self,
        report: &ErrorReport,
        attempt: &RecoveryAttempt,
        timeout: Duration,
    ) -> (AttemptOutcome, Option<String>) {
        let Some(executor) = self.services.executors.get(attempt.strategy) else {
            return (
                AttemptOutcome::Failed,
                Some(format!("no executor registered for {}", attempt.strategy)),
            );
        };

        let report = report.clone();
        let owned_attempt = attempt.clone();
        let handle = tokio::spawn(async move { executor.execute(&report, &owned_attempt).await });

        // On timeout the handle is dropped and the task runs on detached.
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(ExecutionOutcome::Succeeded)) => (AttemptOutcome::Succeeded, None),
            Ok(Ok(ExecutionOutcome::Failed(reason))) => (AttemptOutcome::Failed, Some(reason)),
            Ok(Err(e)) => (AttemptOutcome::Failed, Some(format!("executor task failed: {e}"))),
            Err(_) => {
                warn!(
                    error_id = %attempt.error_id,
                    strategy = %attempt.strategy,
                    timeout_ms = timeout.as_millis() as u64,
                    "Recovery attempt timed out"
                );
                (
                    AttemptOutcome::TimedOut,
                    Some(format!("no outcome within {}ms", timeout.as_millis())),
                )
            }
        }
    }

    fn finish(&self, id: &ErrorId, state: TerminalState, reason: impl Into<String>) {
        let reason = reason.into();
        let finished = {
            let mut history = self.history.lock();
            history.get_mut(id).map(|record| {
                record.finish(state, reason.clone());
                let elapsed = record
                    .ended_at
                    .and_then(|end| (end - record.received_at).to_std().ok());
                let strategy = record
                    .last_attempt()
                    .map(|a| a.strategy)
                    .unwrap_or(RecoveryStrategy::Retry);
                (
                    record.report.agent_id.clone(),
                    record.attempts().len() as u32,
                    strategy,
                    elapsed,
                )
            })
        };
        let Some((agent_id, total_attempts, strategy, elapsed)) = finished else {
            return;
        };

        self.services.analytics.record_terminal(state, elapsed);
        let now = Utc::now();
        let event = match state {
            TerminalState::Resolved => {
                info!(error_id = %id, agent_id = %agent_id, strategy = %strategy, total_attempts, "Report resolved");
                RecoveryEvent::ReportResolved {
                    error_id: id.clone(),
                    agent_id,
                    strategy,
                    total_attempts,
                    resolved_at: now,
                }
            }
            TerminalState::Escalated => {
                counter!("warden_escalations_total").increment(1);
                warn!(error_id = %id, agent_id = %agent_id, total_attempts, reason = %reason, "Report escalated to operators");
                RecoveryEvent::ReportEscalated {
                    error_id: id.clone(),
                    agent_id,
                    total_attempts,
                    reason,
                    escalated_at: now,
                }
            }
            TerminalState::Abandoned => {
                info!(error_id = %id, agent_id = %agent_id, reason = %reason, "Report abandoned");
                RecoveryEvent::ReportAbandoned {
                    error_id: id.clone(),
                    agent_id,
                    reason,
                    abandoned_at: now,
                }
            }
        };
        self.services.publisher.recovery(event);

        if let Some((_, notify)) = self.waiters.remove(id) {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRole;
    use crate::domain::config::HealthConfig;
    use crate::domain::error_report::ErrorCategory;
    use crate::domain::predictor::Prediction;
    use crate::infrastructure::executors::FnExecutor;

    struct NoPrediction;

    impl FailurePredictor for NoPrediction {
        fn predict(&self, _: &FeatureVector, _: f64) -> Prediction {
            Prediction::none()
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    fn coordinator(
        config: RecoveryConfig,
        ingestion: IngestionConfig,
        executors: ExecutorRegistry,
    ) -> Arc<RecoveryCoordinator> {
        let publisher = EventPublisher::default();
        let health = Arc::new(HealthAggregator::new(HealthConfig::default(), publisher.clone()));
        Arc::new(RecoveryCoordinator::new(
            config,
            ingestion,
            CoordinatorServices {
                classifier: ErrorClassifier::default(),
                predictor: Arc::new(NoPrediction),
                executors: Arc::new(executors),
                health,
                analytics: Arc::new(AnalyticsCollector::new()),
                publisher,
            },
        ))
    }

    fn report(severity: Severity) -> ErrorReport {
        ErrorReport::new(
            "runtime-1",
            AgentRole::Runtime,
            severity,
            ErrorCategory::Network,
            "connection reset",
        )
    }

    fn succeed_on(strategy: RecoveryStrategy) -> ExecutorRegistry {
        let registry = ExecutorRegistry::new();
        registry.register_all(FnExecutor::shared(
            move |_: ErrorReport, attempt: RecoveryAttempt| async move {
                if attempt.strategy == strategy {
                    ExecutionOutcome::Succeeded
                } else {
                    ExecutionOutcome::failed("still broken")
                }
            },
        ));
        registry
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_submit_rejects_invalid_and_duplicate_reports() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        let mut bad = report(Severity::Error);
        bad.message = "  ".to_string();
        assert_eq!(
            coord.submit(bad),
            Err(IngestError::Invalid(ValidationError::EmptyField("message")))
        );

        let first = report(Severity::Error).with_id("e-1");
        coord.submit(first.clone()).unwrap();
        assert_eq!(
            coord.submit(first),
            Err(IngestError::DuplicateErrorId(ErrorId::from_string("e-1")))
        );
    }

    #[tokio::test]
    async fn test_full_queue_is_reported_without_blocking() {
        let ingestion = IngestionConfig {
            queue_capacity: 2,
            ..IngestionConfig::default()
        };
        let coord = coordinator(RecoveryConfig::default(), ingestion, ExecutorRegistry::new());
        coord.submit(report(Severity::Error)).unwrap();
        coord.submit(report(Severity::Error)).unwrap();
        assert_eq!(coord.submit(report(Severity::Error)), Err(IngestError::QueueFull));
        assert_eq!(coord.retained_reports(), 2);
    }

    #[tokio::test]
    async fn test_failed_attempt_climbs_the_ladder() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            succeed_on(RecoveryStrategy::Fallback),
        );
        coord.start();
        let id = coord.submit(report(Severity::Error)).unwrap();

        assert_eq!(coord.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Resolved));
        let record = coord.report(&id).unwrap();
        let strategies: Vec<_> = record.attempts().iter().map(|a| a.strategy).collect();
        assert_eq!(strategies, vec![RecoveryStrategy::Retry, RecoveryStrategy::Fallback]);
        assert_eq!(record.attempts()[0].outcome(), AttemptOutcome::Failed);
        assert_eq!(record.attempts()[0].detail(), Some("still broken"));
    }

    #[tokio::test]
    async fn test_missing_executor_escalates_after_max_attempts() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        coord.start();
        let id = coord.submit(report(Severity::Error)).unwrap();

        assert_eq!(coord.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Escalated));
        let record = coord.report(&id).unwrap();
        assert_eq!(record.attempts().len(), 3);
        assert!(record
            .attempts()
            .iter()
            .all(|a| a.outcome() == AttemptOutcome::Failed));
    }

    #[tokio::test]
    async fn test_slow_executor_times_out() {
        let config = RecoveryConfig {
            max_recovery_attempts: 1,
            recovery_timeout: Duration::from_millis(20),
            ..RecoveryConfig::default()
        };
        let registry = ExecutorRegistry::new();
        registry.register_all(FnExecutor::shared(|_: ErrorReport, _: RecoveryAttempt| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ExecutionOutcome::Succeeded
        }));
        let coord = coordinator(config, IngestionConfig::default(), registry);
        coord.start();
        let id = coord.submit(report(Severity::Error)).unwrap();

        assert_eq!(coord.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Escalated));
        let attempt = coord.report(&id).unwrap().attempts()[0].clone();
        assert_eq!(attempt.outcome(), AttemptOutcome::TimedOut);
        assert!(attempt.duration().unwrap() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_low_severity_is_abandoned_without_attempts() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            succeed_on(RecoveryStrategy::Retry),
        );
        coord.start();
        let id = coord.submit(report(Severity::Warning)).unwrap();

        assert_eq!(coord.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Abandoned));
        assert!(coord.report(&id).unwrap().attempts().is_empty());
    }

    #[tokio::test]
    async fn test_manual_recovery_preconditions() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            succeed_on(RecoveryStrategy::Restart),
        );
        assert_eq!(
            coord.request_manual_recovery(&ErrorId::from_string("nope"), RecoveryStrategy::Retry),
            Err(RecoveryRequestError::UnknownError(ErrorId::from_string("nope")))
        );

        // Not started yet, so the report is still queued.
        let id = coord.submit(report(Severity::Error)).unwrap();
        assert_eq!(
            coord.request_manual_recovery(&id, RecoveryStrategy::Restart),
            Err(RecoveryRequestError::InProgress(id.clone()))
        );

        coord.start();
        assert_eq!(coord.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Escalated));
        assert_eq!(
            coord.request_manual_recovery(&id, RecoveryStrategy::Restart),
            Err(RecoveryRequestError::AttemptsExhausted { max: 3 })
        );
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_reports() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        let a = coord.submit(report(Severity::Error)).unwrap();
        let b = coord.submit(report(Severity::Critical)).unwrap();
        coord.shutdown();

        assert_eq!(coord.terminal_state(&a), Some(TerminalState::Abandoned));
        assert_eq!(coord.terminal_state(&b), Some(TerminalState::Abandoned));
        assert_eq!(
            coord.report(&a).unwrap().terminal_reason.as_deref(),
            Some(SHUTDOWN_REASON)
        );
        assert_eq!(coord.submit(report(Severity::Error)), Err(IngestError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_reserved_slot_during_shutdown_is_abandoned() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        let dispatcher = coord.start().unwrap();
        let late = report(Severity::Error);
        let id = late.id.clone();
        coord.history.lock().insert(ReportRecord::new(late, 3)).unwrap();

        let slot = coord.sender.try_reserve().unwrap();
        coord.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dispatcher.is_finished());

        slot.send(id.clone());
        dispatcher.await.unwrap();
        assert_eq!(coord.terminal_state(&id), Some(TerminalState::Abandoned));
    }

    #[tokio::test]
    async fn test_unstarted_shutdown_keeps_late_sends_drainable() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        let late = report(Severity::Error);
        let id = late.id.clone();
        coord.history.lock().insert(ReportRecord::new(late, 3)).unwrap();

        let slot = coord.sender.try_reserve().unwrap();
        coord.shutdown();
        slot.send(id.clone());
        assert_eq!(coord.terminal_state(&id), None);

        coord.start().unwrap().await.unwrap();
        assert_eq!(coord.terminal_state(&id), Some(TerminalState::Abandoned));
    }

    #[tokio::test]
    async fn test_waiting_on_terminal_reports_leaves_no_waiters() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            succeed_on(RecoveryStrategy::Retry),
        );
        coord.start();
        let ids: Vec<_> = (0..50)
            .map(|_| coord.submit(report(Severity::Error)).unwrap())
            .collect();

        for id in &ids {
            assert_eq!(coord.wait_for_terminal(id, WAIT).await, Some(TerminalState::Resolved));
        }
        for id in &ids {
            assert_eq!(coord.wait_for_terminal(id, WAIT).await, Some(TerminalState::Resolved));
        }
        assert_eq!(coord.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_waiter_does_not_strand_others() {
        let registry = ExecutorRegistry::new();
        registry.register_all(FnExecutor::shared(|_: ErrorReport, _: RecoveryAttempt| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ExecutionOutcome::Succeeded
        }));
        let coord = coordinator(RecoveryConfig::default(), IngestionConfig::default(), registry);
        coord.start();
        let id = coord.submit(report(Severity::Error)).unwrap();

        let started = Instant::now();
        let (impatient, patient) = tokio::join!(
            coord.wait_for_terminal(&id, Duration::from_millis(10)),
            coord.wait_for_terminal(&id, WAIT),
        );
        assert_eq!(impatient, None);
        assert_eq!(patient, Some(TerminalState::Resolved));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(coord.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_unknown_report() {
        let coord = coordinator(
            RecoveryConfig::default(),
            IngestionConfig::default(),
            ExecutorRegistry::new(),
        );
        assert_eq!(
            coord
                .wait_for_terminal(&ErrorId::from_string("missing"), Duration::from_millis(10))
                .await,
            None
        );
    }
}
