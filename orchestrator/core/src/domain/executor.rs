// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strategy Executors
//!
//! Collaborators implement [`StrategyExecutor`] to perform the real recovery
//! action for a strategy (restart a worker, flip to a fallback path...). The
//! coordinator enforces the deadline: an executor that does not answer in time
//! is recorded as `TimedOut` and its late result is discarded, so executors
//! must be idempotent.

use async_trait::async_trait;
use std::fmt;

use crate::domain::error_report::ErrorReport;
use crate::domain::recovery::RecoveryAttempt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
}

impl ExecutionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(&self, report: &ErrorReport, attempt: &RecoveryAttempt) -> ExecutionOutcome;
}
