// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Strategy Executor Adapters
//
// - ExecutorRegistry: strategy -> executor lookup used by the coordinator
// - FnExecutor: wraps an async closure (tests, simulations, thin integrations)
// - CheckpointRollbackExecutor: restores the failing agent's checkpoint

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::agent::AgentId;
use crate::domain::checkpoint::{Checkpoint, CheckpointStore};
use crate::domain::error_report::ErrorReport;
use crate::domain::executor::{ExecutionOutcome, StrategyExecutor};
use crate::domain::recovery::{RecoveryAttempt, RecoveryStrategy};

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<RecoveryStrategy, Arc<dyn StrategyExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for `strategy`. `Escalate` never
    /// executes and is ignored.
    pub fn register(&self, strategy: RecoveryStrategy, executor: Arc<dyn StrategyExecutor>) {
        if strategy.is_escalation() {
            warn!("Ignoring executor registered for the escalate strategy");
            return;
        }
        debug!(strategy = %strategy, "Registered strategy executor");
        self.executors.insert(strategy, executor);
    }

    /// Register one executor for every executable strategy.
    pub fn register_all(&self, executor: Arc<dyn StrategyExecutor>) {
        for strategy in RecoveryStrategy::ALL {
            if !strategy.is_escalation() {
                self.executors.insert(strategy, executor.clone());
            }
        }
    }

    pub fn with(self, strategy: RecoveryStrategy, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.register(strategy, executor);
        self
    }

    pub fn get(&self, strategy: RecoveryStrategy) -> Option<Arc<dyn StrategyExecutor>> {
        self.executors.get(&strategy).map(|e| e.value().clone())
    }

    pub fn contains(&self, strategy: RecoveryStrategy) -> bool {
        self.executors.contains_key(&strategy)
    }
}

/// Executor backed by an async closure over owned copies of the report and
/// attempt.
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(ErrorReport, RecoveryAttempt) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionOutcome> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn StrategyExecutor> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> StrategyExecutor for FnExecutor<F>
where
    F: Fn(ErrorReport, RecoveryAttempt) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecutionOutcome> + Send + 'static,
{
    async fn execute(&self, report: &ErrorReport, attempt: &RecoveryAttempt) -> ExecutionOutcome {
        (self.f)(report.clone(), attempt.clone()).await
    }
}

/// Receives restored checkpoint payloads. Implemented by the collaborator that
/// owns the agent's state.
#[async_trait]
pub trait RestoreTarget: Send + Sync {
    async fn restore(&self, agent_id: &AgentId, checkpoint: &Checkpoint) -> Result<(), String>;
}

/// Rollback executor: looks up the checkpoint keyed by the reporting agent's
/// id and hands it to the restore target. A missing checkpoint fails the
/// attempt so the ladder moves on.
pub struct CheckpointRollbackExecutor {
    store: Arc<dyn CheckpointStore>,
    target: Arc<dyn RestoreTarget>,
}

impl CheckpointRollbackExecutor {
    pub fn new(store: Arc<dyn CheckpointStore>, target: Arc<dyn RestoreTarget>) -> Self {
        Self { store, target }
    }
}

#[async_trait]
impl StrategyExecutor for CheckpointRollbackExecutor {
    async fn execute(&self, report: &ErrorReport, attempt: &RecoveryAttempt) -> ExecutionOutcome {
        let checkpoint = match self.store.rollback(report.agent_id.as_str()) {
            Ok(cp) => cp,
            Err(e) => {
                debug!(error_id = %attempt.error_id, "Rollback has no checkpoint: {}", e);
                return ExecutionOutcome::failed(e.to_string());
            }
        };
        match self.target.restore(&report.agent_id, &checkpoint).await {
            Ok(()) => ExecutionOutcome::Succeeded,
            Err(reason) => ExecutionOutcome::Failed(reason),
        }
    }
}
