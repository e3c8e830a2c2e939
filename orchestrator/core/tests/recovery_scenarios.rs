// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end recovery scenarios driven through the [`Orchestrator`].
//!
//! Executors are closures, so each test scripts outcomes, delays and
//! concurrency counters directly:
//! - critical memory errors restart first and climb the ladder on failure
//! - attempts are bounded and deadlines turn silence into `TimedOut`
//! - the parallel-recovery bound holds under a burst from many agents
//! - manual recovery bypasses prediction but not the attempt budget
//! - shutdown abandons queued work

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_core::application::orchestrator::Orchestrator;
use warden_core::application::recovery_coordinator::RecoveryRequestError;
use warden_core::domain::agent::{AgentId, AgentRole};
use warden_core::domain::classifier::FeatureVector;
use warden_core::domain::config::WardenConfigManifest;
use warden_core::domain::error_report::{ErrorCategory, ErrorReport, Severity};
use warden_core::domain::events::RecoveryEvent;
use warden_core::domain::executor::ExecutionOutcome;
use warden_core::domain::predictor::{FailurePredictor, Prediction};
use warden_core::domain::recovery::{
    AttemptOutcome, RecoveryAttempt, RecoveryStrategy, SelectionReason, TerminalState,
};
use warden_core::infrastructure::executors::FnExecutor;

const WAIT: Duration = Duration::from_secs(10);

/// Always confident, always recommends the same strategy, counts calls.
struct ScriptedPredictor {
    recommend: RecoveryStrategy,
    calls: AtomicUsize,
}

impl ScriptedPredictor {
    fn new(recommend: RecoveryStrategy) -> Arc<Self> {
        Arc::new(Self {
            recommend,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FailurePredictor for ScriptedPredictor {
    fn predict(&self, _: &FeatureVector, _: f64) -> Prediction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Prediction {
            confidence: 0.99,
            recommended_strategy: Some(self.recommend),
            estimated_time_to_failure: None,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn report(agent: &str, severity: Severity, category: ErrorCategory) -> ErrorReport {
    ErrorReport::new(agent, AgentRole::Runtime, severity, category, "scenario failure")
}

fn succeed_only(strategy: RecoveryStrategy) -> Arc<dyn warden_core::domain::executor::StrategyExecutor> {
    FnExecutor::shared(move |_: ErrorReport, attempt: RecoveryAttempt| async move {
        if attempt.strategy == strategy {
            ExecutionOutcome::Succeeded
        } else {
            ExecutionOutcome::failed(format!("{} did not help", attempt.strategy))
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_critical_memory_error_restarts_then_isolates() {
    let config = WardenConfigManifest::default();
    let restart_timeout = config.spec.recovery.timeout_for(RecoveryStrategy::Restart);
    let warden = Orchestrator::builder(config)
        .with_predictor(ScriptedPredictor::new(RecoveryStrategy::Fallback))
        .with_default_executor(succeed_only(RecoveryStrategy::Isolate))
        .build()
        .unwrap();
    warden.start();

    let id = warden
        .submit_error_report(report("runtime-1", Severity::Critical, ErrorCategory::Memory))
        .unwrap();
    assert_eq!(warden.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Resolved));

    let record = warden.report(&id).unwrap();
    let attempts = record.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].strategy, RecoveryStrategy::Restart);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].outcome(), AttemptOutcome::Failed);
    assert_eq!(attempts[1].strategy, RecoveryStrategy::Isolate);
    assert_eq!(attempts[1].attempt_number, 2);
    assert_eq!(attempts[1].outcome(), AttemptOutcome::Succeeded);

    let gap = (attempts[1].started_at - attempts[0].started_at).to_std().unwrap();
    assert!(gap < restart_timeout * 2, "second attempt started after {gap:?}");
    // Critical reports never consult the predictor.
    assert!(record.prediction.is_none());

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_attempts_never_exceed_the_budget() {
    let mut config = WardenConfigManifest::default();
    config.spec.recovery.max_recovery_attempts = 4;
    let warden = Orchestrator::builder(config)
        .with_predictor(ScriptedPredictor::new(RecoveryStrategy::Retry))
        .with_default_executor(FnExecutor::shared(|_: ErrorReport, _: RecoveryAttempt| async {
            ExecutionOutcome::failed("nope")
        }))
        .build()
        .unwrap();
    warden.start();

    let ids: Vec<_> = (0..20)
        .map(|i| {
            warden
                .submit_error_report(report(&format!("agent-{}", i % 5), Severity::Error, ErrorCategory::Network))
                .unwrap()
        })
        .collect();

    for id in &ids {
        assert_eq!(warden.wait_for_terminal(id, WAIT).await, Some(TerminalState::Escalated));
        let record = warden.report(id).unwrap();
        let strategies: Vec<_> = record.attempts().iter().map(|a| a.strategy).collect();
        assert_eq!(
            strategies,
            vec![
                RecoveryStrategy::Retry,
                RecoveryStrategy::Fallback,
                RecoveryStrategy::Rollback,
                RecoveryStrategy::Restart,
            ]
        );
        let numbers: Vec<u32> = record.attempts().iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    let analytics = warden.get_analytics();
    assert_eq!(analytics.escalated, 20);
    assert_eq!(analytics.total_attempts, 80);
    assert_eq!(analytics.success_rate_by_strategy[&RecoveryStrategy::Retry], 0.0);

    let health = warden.get_agent_health(&AgentId::new("agent-0")).unwrap();
    assert_eq!(health.consecutive_error_count, 16);

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_executor_times_out_and_escalation_follows() {
    let mut config = WardenConfigManifest::default();
    config.spec.recovery.recovery_timeout = Duration::from_millis(30);
    let warden = Orchestrator::builder(config)
        .with_predictor(ScriptedPredictor::new(RecoveryStrategy::Retry))
        .with_default_executor(FnExecutor::shared(
            |_: ErrorReport, attempt: RecoveryAttempt| async move {
                if attempt.strategy == RecoveryStrategy::Retry {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                ExecutionOutcome::Succeeded
            },
        ))
        .build()
        .unwrap();
    warden.start();

    let id = warden
        .submit_error_report(report("runtime-2", Severity::Error, ErrorCategory::Network))
        .unwrap();
    assert_eq!(warden.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Resolved));

    let record = warden.report(&id).unwrap();
    let attempts = record.attempts();
    assert_eq!(attempts[0].outcome(), AttemptOutcome::TimedOut);
    assert!(attempts[0].duration().unwrap() < Duration::from_millis(500));
    assert_eq!(attempts[1].strategy, RecoveryStrategy::Fallback);
    assert_eq!(attempts[1].outcome(), AttemptOutcome::Succeeded);

    let lag = (attempts[1].started_at - attempts[0].deadline)
        .to_std()
        .unwrap_or_default();
    assert!(lag < Duration::from_millis(250), "next attempt lagged {lag:?}");

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_burst_from_many_agents_respects_parallel_bound() {
    let mut config = WardenConfigManifest::default();
    config.spec.recovery.max_parallel_recoveries = 16;
    config.spec.recovery.recovery_timeout = Duration::from_secs(5);
    config.spec.recovery.strategy_timeouts.clear();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor = {
        let current = current.clone();
        let peak = peak.clone();
        FnExecutor::shared(move |_: ErrorReport, _: RecoveryAttempt| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                ExecutionOutcome::Succeeded
            }
        })
    };

    let warden = Arc::new(
        Orchestrator::builder(config)
            .with_default_executor(executor)
            .build()
            .unwrap(),
    );
    warden.start();

    let mut submitters = Vec::new();
    for agent in 0..25 {
        let warden = warden.clone();
        submitters.push(tokio::spawn(async move {
            (0..40)
                .map(|_| {
                    warden
                        .submit_error_report(report(
                            &format!("agent-{agent}"),
                            Severity::Error,
                            ErrorCategory::Runtime,
                        ))
                        .unwrap()
                })
                .collect::<Vec<_>>()
        }));
    }
    let mut ids = Vec::new();
    for submitter in submitters {
        ids.extend(submitter.await.unwrap());
    }
    assert_eq!(ids.len(), 1000);

    let mut terminal = 0;
    for id in &ids {
        if warden.wait_for_terminal(id, Duration::from_secs(30)).await.is_some() {
            terminal += 1;
        }
    }
    assert_eq!(terminal, 1000);

    let observed = peak.load(Ordering::SeqCst);
    assert!(observed <= 16, "{observed} attempts executed at once");
    assert!(observed >= 2);

    let analytics = warden.get_analytics();
    assert!(analytics.peak_in_flight <= 16);
    assert_eq!(analytics.in_flight, 0);
    assert_eq!(analytics.total_errors, 1000);
    assert_eq!(analytics.total_recoveries, 1000);
    assert_eq!(analytics.errors_by_role[&AgentRole::Runtime], 1000);
    assert_eq!(warden.system_health().agents, 25);

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_recovery_bypasses_prediction_within_budget() {
    let predictor = ScriptedPredictor::new(RecoveryStrategy::Fallback);
    let warden = Orchestrator::builder(WardenConfigManifest::default())
        .with_predictor(predictor.clone())
        .with_default_executor(succeed_only(RecoveryStrategy::Fallback))
        .build()
        .unwrap();
    warden.start();

    let id = warden
        .submit_error_report(report("tools-1", Severity::Error, ErrorCategory::Filesystem))
        .unwrap();
    assert_eq!(warden.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Resolved));
    assert_eq!(predictor.calls(), 1);
    assert_eq!(warden.report(&id).unwrap().attempts()[0].strategy, RecoveryStrategy::Fallback);

    let mut events = warden.subscribe_error(id.clone());
    warden
        .request_manual_recovery(&id, RecoveryStrategy::Restart)
        .unwrap();
    assert_eq!(warden.wait_for_terminal(&id, WAIT).await, Some(TerminalState::Escalated));

    let record = warden.report(&id).unwrap();
    let attempts = record.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1].strategy, RecoveryStrategy::Restart);
    assert_eq!(attempts[1].attempt_number, 2);
    assert!(attempts[1].manual);
    assert_eq!(attempts[2].strategy, RecoveryStrategy::Isolate);
    assert!(!attempts[2].manual);
    assert_eq!(predictor.calls(), 1);

    assert!(matches!(
        events.recv().await.unwrap(),
        RecoveryEvent::ManualRecoveryRequested { strategy: RecoveryStrategy::Restart, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        RecoveryEvent::StrategySelected { reason: SelectionReason::Manual, attempt_number: 2, .. }
    ));

    assert_eq!(
        warden.request_manual_recovery(&id, RecoveryStrategy::Retry),
        Err(RecoveryRequestError::AttemptsExhausted { max: 3 })
    );
    assert_eq!(warden.get_analytics().manual_recoveries, 1);

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_stream_for_one_report() {
    let warden = Orchestrator::builder(WardenConfigManifest::default())
        .with_predictor(ScriptedPredictor::new(RecoveryStrategy::Retry))
        .with_default_executor(succeed_only(RecoveryStrategy::Retry))
        .build()
        .unwrap();
    warden.start();

    let report = report("build-1", Severity::Error, ErrorCategory::Unknown)
        .with_context("linker: undefined reference while compiling module");
    let mut events = warden.subscribe_error(report.id.clone());
    let id = warden.submit_error_report(report).unwrap();

    let mut kinds = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let RecoveryEvent::ErrorClassified { category, inferred, .. } = &event {
            assert_eq!(*category, ErrorCategory::Compilation);
            assert!(*inferred);
        }
        kinds.push(event.kind());
        if event.is_terminal() {
            break;
        }
    }
    assert_eq!(
        kinds,
        vec![
            "error_received",
            "error_classified",
            "prediction_generated",
            "strategy_selected",
            "attempt_started",
            "attempt_completed",
            "report_resolved",
        ]
    );
    assert_eq!(warden.get_analytics().errors_by_category[&ErrorCategory::Compilation], 1);
    assert_eq!(warden.report(&id).unwrap().terminal_state(), Some(TerminalState::Resolved));

    warden.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_abandons_waiting_reports() {
    let mut config = WardenConfigManifest::default();
    config.spec.recovery.max_parallel_recoveries = 1;
    config.spec.recovery.recovery_timeout = Duration::from_secs(5);
    config.spec.recovery.strategy_timeouts.clear();
    let warden = Orchestrator::builder(config)
        .with_predictor(ScriptedPredictor::new(RecoveryStrategy::Retry))
        .with_default_executor(FnExecutor::shared(|_: ErrorReport, _: RecoveryAttempt| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ExecutionOutcome::Succeeded
        }))
        .build()
        .unwrap();
    warden.start();

    let ids: Vec<_> = (0..5)
        .map(|_| {
            warden
                .submit_error_report(report("runtime-9", Severity::Error, ErrorCategory::Network))
                .unwrap()
        })
        .collect();

    for _ in 0..100 {
        if warden.get_analytics().in_flight == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(warden.get_analytics().in_flight, 1);

    warden.shutdown().await;
    assert!(warden
        .submit_error_report(report("runtime-9", Severity::Error, ErrorCategory::Network))
        .is_err());

    assert_eq!(warden.wait_for_terminal(&ids[0], WAIT).await, Some(TerminalState::Resolved));
    for id in &ids[1..] {
        assert_eq!(warden.wait_for_terminal(id, WAIT).await, Some(TerminalState::Abandoned));
        assert_eq!(
            warden.report(id).unwrap().terminal_reason.as_deref(),
            Some("shutdown")
        );
    }
}
