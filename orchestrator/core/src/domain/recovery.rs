// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Recovery Domain
//!
//! Strategies, attempts and the per-report lifecycle aggregate driven by the
//! recovery coordinator.
//!
//! ## Report Lifecycle
//! ```text
//! Received → Classified → StrategySelected → Executing ─┬─ Succeeded ─→ Resolved
//!                               ▲                       └─ Failed / TimedOut
//!                               └──── next ladder rung ◄────┘ (attempts remain)
//!                                                          otherwise → Escalated
//! ```
//!
//! ## Strategy Selection
//! | Condition | Strategy |
//! |-----------|----------|
//! | `Critical` + `Memory` | `Restart` |
//! | `Critical` + `Security` | `Isolate` |
//! | `Critical` + `Performance` | `ScaleDown` |
//! | `Critical` + anything else | `Rollback` |
//! | prediction confidence > threshold | predictor recommendation |
//! | otherwise | `Retry` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::error_report::{ErrorCategory, ErrorId, ErrorReport, Severity};
use crate::domain::predictor::Prediction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Rollback,
    Restart,
    Isolate,
    ScaleDown,
    GracefulDegradation,
    Escalate,
}

impl RecoveryStrategy {
    pub const ALL: [RecoveryStrategy; 8] = [
        RecoveryStrategy::Retry,
        RecoveryStrategy::Fallback,
        RecoveryStrategy::Rollback,
        RecoveryStrategy::Restart,
        RecoveryStrategy::Isolate,
        RecoveryStrategy::ScaleDown,
        RecoveryStrategy::GracefulDegradation,
        RecoveryStrategy::Escalate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Rollback => "rollback",
            RecoveryStrategy::Restart => "restart",
            RecoveryStrategy::Isolate => "isolate",
            RecoveryStrategy::ScaleDown => "scale_down",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
            RecoveryStrategy::Escalate => "escalate",
        }
    }

    /// `Escalate` hands the report to operators instead of executing anything.
    pub fn is_escalation(self) -> bool {
        matches!(self, RecoveryStrategy::Escalate)
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of one strategy for one report. Immutable once settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub error_id: ErrorId,
    pub strategy: RecoveryStrategy,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    outcome: AttemptOutcome,
    duration: Option<Duration>,
    detail: Option<String>,
    pub manual: bool,
}

impl RecoveryAttempt {
    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Failure reason reported by the executor, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome != AttemptOutcome::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Resolved,
    Escalated,
    Abandoned,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Resolved => "resolved",
            TerminalState::Escalated => "escalated",
            TerminalState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "state")]
pub enum ReportPhase {
    Received,
    Classified,
    StrategySelected,
    Executing,
    Terminal(TerminalState),
}

/// Why a strategy was chosen for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SelectionReason {
    CriticalOverride,
    Prediction { confidence: f64 },
    Default,
    Escalation,
    Manual,
}

/// Ordered list of strategies walked across successive attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationLadder(Vec<RecoveryStrategy>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("escalation ladder is empty")]
    Empty,
    #[error("strategy `{0}` appears more than once in the escalation ladder")]
    Duplicate(RecoveryStrategy),
}

impl EscalationLadder {
    pub fn new(rungs: Vec<RecoveryStrategy>) -> Result<Self, LadderError> {
        let ladder = Self(rungs);
        ladder.check()?;
        Ok(ladder)
    }

    pub fn check(&self) -> Result<(), LadderError> {
        if self.0.is_empty() {
            return Err(LadderError::Empty);
        }
        for (i, strategy) in self.0.iter().enumerate() {
            if self.0[..i].contains(strategy) {
                return Err(LadderError::Duplicate(*strategy));
            }
        }
        Ok(())
    }

    pub fn rungs(&self) -> &[RecoveryStrategy] {
        &self.0
    }

    /// The rung after `current`. Past the top, or for a strategy that is not on
    /// the ladder, the answer is `Escalate`.
    pub fn next(&self, current: RecoveryStrategy) -> RecoveryStrategy {
        self.0
            .iter()
            .position(|s| *s == current)
            .and_then(|i| self.0.get(i + 1))
            .copied()
            .unwrap_or(RecoveryStrategy::Escalate)
    }
}

impl Default for EscalationLadder {
    fn default() -> Self {
        Self(RecoveryStrategy::ALL.to_vec())
    }
}

/// Pick the strategy for the first automatic attempt.
///
/// Pure: the same inputs always yield the same strategy. Critical reports never
/// consult the prediction.
pub fn select_strategy(
    severity: Severity,
    category: ErrorCategory,
    prediction: Option<&Prediction>,
    prediction_threshold: f64,
) -> (RecoveryStrategy, SelectionReason) {
    if severity >= Severity::Critical {
        let strategy = match category {
            ErrorCategory::Memory => RecoveryStrategy::Restart,
            ErrorCategory::Security => RecoveryStrategy::Isolate,
            ErrorCategory::Performance => RecoveryStrategy::ScaleDown,
            _ => RecoveryStrategy::Rollback,
        };
        return (strategy, SelectionReason::CriticalOverride);
    }

    if let Some(prediction) = prediction {
        if prediction.confidence > prediction_threshold {
            if let Some(strategy) = prediction.recommended_strategy {
                return (
                    strategy,
                    SelectionReason::Prediction {
                        confidence: prediction.confidence,
                    },
                );
            }
        }
    }

    (RecoveryStrategy::Retry, SelectionReason::Default)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("all {max} recovery attempts have been used")]
    AttemptsExhausted { max: u32 },
    #[error("an attempt is already executing")]
    AttemptPending,
    #[error("no attempt is executing")]
    NoPendingAttempt,
    #[error("report is already terminal ({0})")]
    Terminal(TerminalState),
}

/// Lifecycle aggregate for one ingested report: the report itself, its phase
/// and every attempt made for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub report: ErrorReport,
    phase: ReportPhase,
    attempts: Vec<RecoveryAttempt>,
    pub max_attempts: u32,
    pub prediction: Option<Prediction>,
    pub received_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub terminal_reason: Option<String>,
}

impl ReportRecord {
    pub fn new(report: ErrorReport, max_attempts: u32) -> Self {
        Self {
            report,
            phase: ReportPhase::Received,
            attempts: Vec::new(),
            max_attempts,
            prediction: None,
            received_at: Utc::now(),
            ended_at: None,
            terminal_reason: None,
        }
    }

    pub fn id(&self) -> &ErrorId {
        &self.report.id
    }

    pub fn phase(&self) -> ReportPhase {
        self.phase
    }

    pub fn attempts(&self) -> &[RecoveryAttempt] {
        &self.attempts
    }

    pub fn last_attempt(&self) -> Option<&RecoveryAttempt> {
        self.attempts.last()
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts.len() as u32)
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        match self.phase {
            ReportPhase::Terminal(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state().is_some()
    }

    pub fn classify(&mut self, prediction: Option<Prediction>) {
        self.prediction = prediction;
        self.phase = ReportPhase::Classified;
    }

    pub fn select_strategy(&mut self) {
        self.phase = ReportPhase::StrategySelected;
    }

    /// Put a terminal report back into play for an operator-requested attempt.
    pub fn reopen(&mut self) -> Result<(), RecoveryError> {
        if self.attempts_remaining() == 0 {
            return Err(RecoveryError::AttemptsExhausted {
                max: self.max_attempts,
            });
        }
        self.phase = ReportPhase::StrategySelected;
        self.ended_at = None;
        self.terminal_reason = None;
        Ok(())
    }

    pub fn start_attempt(
        &mut self,
        strategy: RecoveryStrategy,
        timeout: Duration,
        manual: bool,
    ) -> Result<&RecoveryAttempt, RecoveryError> {
        if let Some(state) = self.terminal_state() {
            return Err(RecoveryError::Terminal(state));
        }
        if self.attempts.last().is_some_and(|a| !a.is_settled()) {
            return Err(RecoveryError::AttemptPending);
        }
        if self.attempts_remaining() == 0 {
            return Err(RecoveryError::AttemptsExhausted {
                max: self.max_attempts,
            });
        }

        let started_at = Utc::now();
        let budget = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        self.attempts.push(RecoveryAttempt {
            error_id: self.report.id.clone(),
            strategy,
            attempt_number: self.attempts.len() as u32 + 1,
            started_at,
            deadline: started_at + budget,
            outcome: AttemptOutcome::Pending,
            duration: None,
            detail: None,
            manual,
        });
        self.phase = ReportPhase::Executing;

        let idx = self.attempts.len() - 1;
        Ok(&self.attempts[idx])
    }

    /// Record the outcome of the executing attempt.
    pub fn settle_attempt(
        &mut self,
        outcome: AttemptOutcome,
        duration: Duration,
        detail: Option<String>,
    ) -> Result<&RecoveryAttempt, RecoveryError> {
        let attempt = match self.attempts.last_mut() {
            Some(a) if !a.is_settled() => a,
            _ => return Err(RecoveryError::NoPendingAttempt),
        };
        if outcome == AttemptOutcome::Pending {
            return Err(RecoveryError::AttemptPending);
        }
        attempt.outcome = outcome;
        attempt.duration = Some(duration);
        attempt.detail = detail;
        self.phase = ReportPhase::StrategySelected;
        Ok(attempt)
    }

    pub fn finish(&mut self, state: TerminalState, reason: impl Into<String>) {
        self.phase = ReportPhase::Terminal(state);
        self.ended_at = Some(Utc::now());
        self.terminal_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRole;

    fn prediction(confidence: f64, strategy: Option<RecoveryStrategy>) -> Prediction {
        Prediction {
            confidence,
            recommended_strategy: strategy,
            estimated_time_to_failure: None,
        }
    }

    fn record(max: u32) -> ReportRecord {
        let report = ErrorReport::new(
            "runtime-1",
            AgentRole::Runtime,
            Severity::Error,
            ErrorCategory::Network,
            "timeout",
        );
        ReportRecord::new(report, max)
    }

    #[test]
    fn test_default_ladder_order() {
        let ladder = EscalationLadder::default();
        assert_eq!(ladder.next(RecoveryStrategy::Retry), RecoveryStrategy::Fallback);
        assert_eq!(ladder.next(RecoveryStrategy::Fallback), RecoveryStrategy::Rollback);
        assert_eq!(ladder.next(RecoveryStrategy::Rollback), RecoveryStrategy::Restart);
        assert_eq!(ladder.next(RecoveryStrategy::Restart), RecoveryStrategy::Isolate);
        assert_eq!(ladder.next(RecoveryStrategy::Isolate), RecoveryStrategy::ScaleDown);
        assert_eq!(
            ladder.next(RecoveryStrategy::ScaleDown),
            RecoveryStrategy::GracefulDegradation
        );
        assert_eq!(
            ladder.next(RecoveryStrategy::GracefulDegradation),
            RecoveryStrategy::Escalate
        );
        assert_eq!(ladder.next(RecoveryStrategy::Escalate), RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_custom_ladder_escalates_off_ladder_strategies() {
        let ladder =
            EscalationLadder::new(vec![RecoveryStrategy::Retry, RecoveryStrategy::Restart]).unwrap();
        assert_eq!(ladder.next(RecoveryStrategy::Retry), RecoveryStrategy::Restart);
        assert_eq!(ladder.next(RecoveryStrategy::Restart), RecoveryStrategy::Escalate);
        assert_eq!(ladder.next(RecoveryStrategy::Isolate), RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_ladder_rejects_empty_and_duplicates() {
        assert_eq!(EscalationLadder::new(vec![]), Err(LadderError::Empty));
        assert_eq!(
            EscalationLadder::new(vec![RecoveryStrategy::Retry, RecoveryStrategy::Retry]),
            Err(LadderError::Duplicate(RecoveryStrategy::Retry))
        );
    }

    #[test]
    fn test_critical_mapping_ignores_prediction() {
        let confident = prediction(0.99, Some(RecoveryStrategy::Fallback));
        let cases = [
            (ErrorCategory::Memory, RecoveryStrategy::Restart),
            (ErrorCategory::Security, RecoveryStrategy::Isolate),
            (ErrorCategory::Performance, RecoveryStrategy::ScaleDown),
            (ErrorCategory::Network, RecoveryStrategy::Rollback),
            (ErrorCategory::Unknown, RecoveryStrategy::Rollback),
        ];
        for (category, expected) in cases {
            let (strategy, reason) =
                select_strategy(Severity::Critical, category, Some(&confident), 0.7);
            assert_eq!(strategy, expected, "{category}");
            assert_eq!(reason, SelectionReason::CriticalOverride);
        }
    }

    #[test]
    fn test_prediction_must_exceed_threshold() {
        let at_threshold = prediction(0.7, Some(RecoveryStrategy::Restart));
        let (strategy, _) =
            select_strategy(Severity::Error, ErrorCategory::Memory, Some(&at_threshold), 0.7);
        assert_eq!(strategy, RecoveryStrategy::Retry);

        let above = prediction(0.71, Some(RecoveryStrategy::Restart));
        let (strategy, reason) =
            select_strategy(Severity::Error, ErrorCategory::Memory, Some(&above), 0.7);
        assert_eq!(strategy, RecoveryStrategy::Restart);
        assert_eq!(reason, SelectionReason::Prediction { confidence: 0.71 });
    }

    #[test]
    fn test_confident_prediction_without_recommendation_falls_back() {
        let p = prediction(0.95, None);
        let (strategy, reason) =
            select_strategy(Severity::Warning, ErrorCategory::Network, Some(&p), 0.7);
        assert_eq!(strategy, RecoveryStrategy::Retry);
        assert_eq!(reason, SelectionReason::Default);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let p = prediction(0.8, Some(RecoveryStrategy::Fallback));
        let first = select_strategy(Severity::Error, ErrorCategory::Filesystem, Some(&p), 0.7);
        for _ in 0..100 {
            assert_eq!(
                select_strategy(Severity::Error, ErrorCategory::Filesystem, Some(&p), 0.7),
                first
            );
        }
    }

    #[test]
    fn test_attempt_numbers_and_bound() {
        let mut rec = record(2);
        let n = rec
            .start_attempt(RecoveryStrategy::Retry, Duration::from_millis(50), false)
            .unwrap()
            .attempt_number;
        assert_eq!(n, 1);
        assert_eq!(rec.phase(), ReportPhase::Executing);

        assert_eq!(
            rec.start_attempt(RecoveryStrategy::Fallback, Duration::from_millis(50), false)
                .unwrap_err(),
            RecoveryError::AttemptPending
        );

        rec.settle_attempt(AttemptOutcome::Failed, Duration::from_millis(3), None)
            .unwrap();
        let second = rec
            .start_attempt(RecoveryStrategy::Fallback, Duration::from_millis(50), false)
            .unwrap();
        assert_eq!(second.attempt_number, 2);
        rec.settle_attempt(AttemptOutcome::TimedOut, Duration::from_millis(50), None)
            .unwrap();

        assert_eq!(
            rec.start_attempt(RecoveryStrategy::Rollback, Duration::from_millis(50), false)
                .unwrap_err(),
            RecoveryError::AttemptsExhausted { max: 2 }
        );
    }

    #[test]
    fn test_settled_attempt_is_immutable() {
        let mut rec = record(3);
        rec.start_attempt(RecoveryStrategy::Retry, Duration::from_millis(50), false)
            .unwrap();
        rec.settle_attempt(AttemptOutcome::Succeeded, Duration::from_millis(1), None)
            .unwrap();
        assert_eq!(
            rec.settle_attempt(AttemptOutcome::Failed, Duration::from_millis(1), None)
                .unwrap_err(),
            RecoveryError::NoPendingAttempt
        );
        assert_eq!(rec.attempts()[0].outcome(), AttemptOutcome::Succeeded);
    }

    #[test]
    fn test_terminal_report_needs_reopen() {
        let mut rec = record(3);
        rec.finish(TerminalState::Abandoned, "below auto-recovery threshold");
        assert!(rec.is_terminal());
        assert_eq!(
            rec.start_attempt(RecoveryStrategy::Retry, Duration::from_millis(50), true)
                .unwrap_err(),
            RecoveryError::Terminal(TerminalState::Abandoned)
        );
        rec.reopen().unwrap();
        assert!(rec.ended_at.is_none());
        assert!(rec
            .start_attempt(RecoveryStrategy::Retry, Duration::from_millis(50), true)
            .is_ok());
    }

    #[test]
    fn test_deadline_follows_timeout() {
        let mut rec = record(1);
        let attempt = rec
            .start_attempt(RecoveryStrategy::Restart, Duration::from_millis(250), false)
            .unwrap();
        assert_eq!(
            attempt.deadline - attempt.started_at,
            chrono::Duration::milliseconds(250)
        );
    }
}
