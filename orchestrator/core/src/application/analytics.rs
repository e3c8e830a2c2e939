// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Recovery Analytics
//
// Counters fed by the coordinator at each lifecycle step. Reads take a
// consistent snapshot under one short lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::agent::AgentRole;
use crate::domain::error_report::{ErrorCategory, ErrorReport, Severity};
use crate::domain::recovery::{AttemptOutcome, RecoveryStrategy, TerminalState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f64 {
        let settled = self.successes + self.failures + self.timeouts;
        if settled == 0 {
            0.0
        } else {
            self.successes as f64 / settled as f64
        }
    }
}

/// End-to-end time from receipt to resolution, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTimeStats {
    pub count: u64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub total_errors: u64,
    /// Reports that reached `Resolved`.
    pub total_recoveries: u64,
    pub total_attempts: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    pub errors_by_severity: BTreeMap<Severity, u64>,
    pub errors_by_role: BTreeMap<AgentRole, u64>,
    pub strategies: BTreeMap<RecoveryStrategy, StrategyStats>,
    pub success_rate_by_strategy: BTreeMap<RecoveryStrategy, f64>,
    pub resolved: u64,
    pub escalated: u64,
    pub abandoned: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
    pub manual_recoveries: u64,
    pub predictions_generated: u64,
    pub predictions_confident: u64,
    pub recovery_time: RecoveryTimeStats,
}

impl AnalyticsSnapshot {
    /// Share of settled attempts that succeeded, across all strategies.
    pub fn overall_success_rate(&self) -> f64 {
        let (ok, settled) = self.strategies.values().fold((0, 0), |(ok, n), s| {
            (ok + s.successes, n + s.successes + s.failures + s.timeouts)
        });
        if settled == 0 {
            0.0
        } else {
            ok as f64 / settled as f64
        }
    }
}

#[derive(Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn stats(&self) -> RecoveryTimeStats {
        let variance = if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        };
        RecoveryTimeStats {
            count: self.count,
            mean_ms: self.mean,
            stddev_ms: variance.sqrt(),
            min_ms: self.min,
            max_ms: self.max,
        }
    }
}

#[derive(Default)]
struct Counters {
    by_category: [u64; ErrorCategory::COUNT],
    by_severity: [u64; Severity::COUNT],
    by_role: [u64; AgentRole::COUNT],
    strategies: BTreeMap<RecoveryStrategy, StrategyStats>,
    resolved: u64,
    escalated: u64,
    abandoned: u64,
    in_flight: u64,
    peak_in_flight: u64,
    manual: u64,
    predictions: u64,
    confident: u64,
    recovery_time: Welford,
}

#[derive(Default)]
pub struct AnalyticsCollector {
    counters: Mutex<Counters>,
}

impl AnalyticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a report under its classified category.
    pub fn record_error(&self, report: &ErrorReport, category: ErrorCategory) {
        let mut c = self.counters.lock();
        c.by_category[category.index()] += 1;
        c.by_severity[report.severity.index()] += 1;
        c.by_role[report.source_agent.index()] += 1;
    }

    pub fn record_prediction(&self, confident: bool) {
        let mut c = self.counters.lock();
        c.predictions += 1;
        if confident {
            c.confident += 1;
        }
    }

    pub fn record_manual(&self) {
        self.counters.lock().manual += 1;
    }

    /// An attempt began executing. Returns the number now in flight.
    pub fn attempt_started(&self, strategy: RecoveryStrategy) -> u64 {
        let mut c = self.counters.lock();
        c.strategies.entry(strategy).or_default().attempts += 1;
        c.in_flight += 1;
        c.peak_in_flight = c.peak_in_flight.max(c.in_flight);
        c.in_flight
    }

    pub fn attempt_finished(&self, strategy: RecoveryStrategy, outcome: AttemptOutcome) {
        let mut c = self.counters.lock();
        c.in_flight = c.in_flight.saturating_sub(1);
        let stats = c.strategies.entry(strategy).or_default();
        match outcome {
            AttemptOutcome::Succeeded => stats.successes += 1,
            AttemptOutcome::Failed => stats.failures += 1,
            AttemptOutcome::TimedOut => stats.timeouts += 1,
            AttemptOutcome::Pending => {}
        }
    }

    pub fn record_terminal(&self, state: TerminalState, elapsed: Option<Duration>) {
        let mut c = self.counters.lock();
        match state {
            TerminalState::Resolved => {
                c.resolved += 1;
                if let Some(elapsed) = elapsed {
                    c.recovery_time.push(elapsed.as_secs_f64() * 1_000.0);
                }
            }
            TerminalState::Escalated => c.escalated += 1,
            TerminalState::Abandoned => c.abandoned += 1,
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.counters.lock().in_flight
    }

    pub fn peak_in_flight(&self) -> u64 {
        self.counters.lock().peak_in_flight
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let c = self.counters.lock();
        let total_errors = c.by_severity.iter().sum();
        AnalyticsSnapshot {
            total_errors,
            total_recoveries: c.resolved,
            total_attempts: c.strategies.values().map(|s| s.attempts).sum(),
            errors_by_category: ErrorCategory::ALL
                .iter()
                .filter(|k| c.by_category[k.index()] > 0)
                .map(|k| (*k, c.by_category[k.index()]))
                .collect(),
            errors_by_severity: Severity::ALL
                .iter()
                .filter(|k| c.by_severity[k.index()] > 0)
                .map(|k| (*k, c.by_severity[k.index()]))
                .collect(),
            errors_by_role: AgentRole::ALL
                .iter()
                .filter(|k| c.by_role[k.index()] > 0)
                .map(|k| (*k, c.by_role[k.index()]))
                .collect(),
            strategies: c.strategies.clone(),
            success_rate_by_strategy: c
                .strategies
                .iter()
                .map(|(k, s)| (*k, s.success_rate()))
                .collect(),
            resolved: c.resolved,
            escalated: c.escalated,
            abandoned: c.abandoned,
            in_flight: c.in_flight,
            peak_in_flight: c.peak_in_flight,
            manual_recoveries: c.manual,
            predictions_generated: c.predictions,
            predictions_confident: c.confident,
            recovery_time: c.recovery_time.stats(),
        }
    }
}
