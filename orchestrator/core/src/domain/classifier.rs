// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Classifier
//!
//! Stateless projection of an [`ErrorReport`] (plus the reporting agent's
//! current health) into a [`Classification`]: the trusted category and
//! severity, and a fixed-length [`FeatureVector`] for the failure predictor.
//!
//! ## Feature Layout
//! | Range | Encoding |
//! |-------|----------|
//! | `0..6` | one-hot agent role |
//! | `6..10` | one-hot severity |
//! | `10..21` | one-hot category |
//! | `21` | memory usage / configured max, clamped |
//! | `22` | cpu percent / 100, clamped |
//! | `23` | consecutive errors / 10, clamped |
//! | `24` | health deficit (`1 - score`) |

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentRole;
use crate::domain::error_report::{ErrorCategory, ErrorReport, Severity};
use crate::domain::health::AgentHealthState;

const ROLE_OFFSET: usize = 0;
const SEVERITY_OFFSET: usize = ROLE_OFFSET + AgentRole::COUNT;
const CATEGORY_OFFSET: usize = SEVERITY_OFFSET + Severity::COUNT;
const NUMERIC_OFFSET: usize = CATEGORY_OFFSET + ErrorCategory::COUNT;

pub const MEMORY_FEATURE: usize = NUMERIC_OFFSET;
pub const CPU_FEATURE: usize = NUMERIC_OFFSET + 1;
pub const CONSECUTIVE_ERRORS_FEATURE: usize = NUMERIC_OFFSET + 2;
pub const HEALTH_DEFICIT_FEATURE: usize = NUMERIC_OFFSET + 3;

const NUMERIC_FIELDS: usize = 4;
const CONSECUTIVE_ERRORS_SCALE: f64 = 10.0;

/// Ordered keyword table for reports that arrive as `Unknown`. First match wins.
const CATEGORY_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Memory,
        &["out of memory", "oom", "alloc", "heap", "leak", "memory"],
    ),
    (
        ErrorCategory::Security,
        &["permission denied", "unauthorized", "forbidden", "certificate", "security", "exploit"],
    ),
    (
        ErrorCategory::Network,
        &["connection", "socket", "network", "dns", "unreachable", "timed out"],
    ),
    (
        ErrorCategory::Filesystem,
        &["no such file", "file", "disk", "directory", "path", "i/o"],
    ),
    (
        ErrorCategory::Concurrency,
        &["deadlock", "race", "mutex", "lock", "thread"],
    ),
    (
        ErrorCategory::Compilation,
        &["compile", "syntax", "linker", "shader", "undefined reference"],
    ),
    (
        ErrorCategory::Configuration,
        &["config", "setting", "missing key", "invalid option"],
    ),
    (
        ErrorCategory::Performance,
        &["slow", "latency", "throughput", "frame time", "stall"],
    ),
    (
        ErrorCategory::Hardware,
        &["gpu", "device", "driver", "hardware", "thermal"],
    ),
];

/// Fixed-length numeric projection of a report. Every entry is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub const LEN: usize = NUMERIC_OFFSET + NUMERIC_FIELDS;

    pub fn zeros() -> Self {
        Self(vec![0.0; Self::LEN])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> f64 {
        self.0.get(idx).copied().unwrap_or(0.0)
    }

    pub fn role(&self) -> Option<AgentRole> {
        AgentRole::ALL
            .into_iter()
            .find(|r| self.0[ROLE_OFFSET + r.index()] == 1.0)
    }

    pub fn severity(&self) -> Option<Severity> {
        Severity::ALL
            .into_iter()
            .find(|s| self.0[SEVERITY_OFFSET + s.index()] == 1.0)
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| self.0[CATEGORY_OFFSET + c.index()] == 1.0)
    }

    /// Weighted sum against a table of the same length; shorter tables are
    /// zero-extended.
    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.0.iter().zip(weights).map(|(x, w)| x * w).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub features: FeatureVector,
    /// True when the category was inferred from the message.
    pub inferred: bool,
}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_memory_bytes: u64,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(8 * 1024 * 1024 * 1024)
    }
}

impl ErrorClassifier {
    pub fn new(max_memory_bytes: u64) -> Self {
        Self {
            max_memory_bytes: max_memory_bytes.max(1),
        }
    }

    pub fn classify(&self, report: &ErrorReport, health: Option<&AgentHealthState>) -> Classification {
        let (category, inferred) = match report.category {
            ErrorCategory::Unknown => match infer_category(&report.message, &report.context) {
                Some(c) => (c, true),
                None => (ErrorCategory::Unknown, false),
            },
            explicit => (explicit, false),
        };
        let severity = report.severity;

        let mut v = vec![0.0; FeatureVector::LEN];
        v[ROLE_OFFSET + report.source_agent.index()] = 1.0;
        v[SEVERITY_OFFSET + severity.index()] = 1.0;
        v[CATEGORY_OFFSET + category.index()] = 1.0;
        v[MEMORY_FEATURE] = unit(report.memory_usage_bytes as f64 / self.max_memory_bytes as f64);
        v[CPU_FEATURE] = unit(report.cpu_usage_percent / 100.0);

        if let Some(health) = health {
            v[CONSECUTIVE_ERRORS_FEATURE] =
                unit(health.consecutive_error_count as f64 / CONSECUTIVE_ERRORS_SCALE);
            v[HEALTH_DEFICIT_FEATURE] = unit(1.0 - health.score);
        }

        Classification {
            category,
            severity,
            features: FeatureVector(v),
            inferred,
        }
    }
}

/// Clamp into `[0, 1]`; NaN becomes 0.
fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn infer_category(message: &str, context: &str) -> Option<ErrorCategory> {
    let haystack = format!("{} {}", message, context).to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| haystack.contains(w)))
        .map(|(category, _)| *category)
}
