// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Metric Alerts
//!
//! Each `(agent, metric)` pair owns an [`AlertTracker`], a dual-threshold
//! state machine that debounces both raising and resolving:
//!
//! | State | z > upper | lower ≤ z ≤ upper | z < lower |
//! |-------|-----------|-------------------|-----------|
//! | `Normal` | `Alerting(1)` | `Normal` | `Normal` |
//! | `Alerting(n)` | `Alerting(n+1)`, `Open` at `debounce` | `Normal` | `Normal` |
//! | `Open` | `Open` | `Open` | `Resolving(1)` |
//! | `Resolving(n)` | `Open` | `Open` | `Resolving(n+1)`, `Normal` at `debounce` |
//!
//! A resolved alert is never reopened; the next crossing run opens a new one.
//! Acknowledging an alert only records that an operator has seen it; the
//! tracker keeps running and resolution still needs the low run.
//!
//! Thresholds come from the health configuration unless an operator has set
//! an override for the `(agent, metric)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::health::Metric;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
    Emergency,
}

impl AlertSeverity {
    /// Grade an alert by how far its peak z-score overshoots the upper threshold.
    pub fn from_overshoot(peak_z: f64, upper_z: f64) -> Self {
        let ratio = if upper_z > 0.0 { peak_z / upper_z } else { peak_z };
        if ratio >= 4.0 {
            AlertSeverity::Emergency
        } else if ratio >= 2.5 {
            AlertSeverity::Critical
        } else if ratio >= 1.75 {
            AlertSeverity::Error
        } else if ratio >= 1.25 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub agent_id: AgentId,
    pub severity: AlertSeverity,
    pub metric: Metric,
    /// Metric reading that completed the debounce run.
    pub value: f64,
    pub z_score: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolution_hint: String,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("no open or retained alert with id `{0}`")]
    UnknownAlert(AlertId),
    #[error("debounce_samples must be at least 1")]
    ZeroDebounce,
    #[error("thresholds must be finite numbers")]
    NonFinite,
    #[error("lower_z ({lower}) must not exceed upper_z ({upper})")]
    InvertedBand { lower: f64, upper: f64 },
}

/// Hysteresis thresholds for one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub upper_z: f64,
    pub lower_z: f64,
    pub debounce_samples: u32,
    /// Samples required in the window before z-scores are trusted.
    pub min_samples: usize,
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), AlertError> {
        if self.debounce_samples == 0 {
            return Err(AlertError::ZeroDebounce);
        }
        if !(self.upper_z.is_finite() && self.lower_z.is_finite()) {
            return Err(AlertError::NonFinite);
        }
        if self.lower_z > self.upper_z {
            return Err(AlertError::InvertedBand {
                lower: self.lower_z,
                upper: self.upper_z,
            });
        }
        Ok(())
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            upper_z: 3.0,
            lower_z: 1.5,
            debounce_samples: 3,
            min_samples: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TrackerState {
    Normal,
    Alerting { count: u32, peak_z: f64 },
    Open(AlertId),
    Resolving { count: u32, id: AlertId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Unchanged,
    Opened { id: AlertId, peak_z: f64 },
    Resolved(AlertId),
}

#[derive(Debug, Clone)]
pub struct AlertTracker {
    state: TrackerState,
}

impl Default for AlertTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertTracker {
    pub fn new() -> Self {
        Self {
            state: TrackerState::Normal,
        }
    }

    pub fn open_alert(&self) -> Option<&AlertId> {
        match &self.state {
            TrackerState::Open(id) | TrackerState::Resolving { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Feed one oriented z-score through the state machine.
    pub fn observe(&mut self, z: f64, thresholds: &AlertThresholds) -> AlertTransition {
        let debounce = thresholds.debounce_samples.max(1);
        let high = z > thresholds.upper_z;
        let low = z < thresholds.lower_z;

        let (next, transition) = match std::mem::replace(&mut self.state, TrackerState::Normal) {
            TrackerState::Normal if high => Self::count_high(1, z, debounce),
            TrackerState::Normal => (TrackerState::Normal, AlertTransition::Unchanged),
            TrackerState::Alerting { count, peak_z } if high => {
                Self::count_high(count + 1, peak_z.max(z), debounce)
            }
            TrackerState::Alerting { .. } => (TrackerState::Normal, AlertTransition::Unchanged),
            TrackerState::Open(id) if low => Self::count_low(1, id, debounce),
            TrackerState::Open(id) => (TrackerState::Open(id), AlertTransition::Unchanged),
            TrackerState::Resolving { count, id } if low => Self::count_low(count + 1, id, debounce),
            TrackerState::Resolving { id, .. } => {
                (TrackerState::Open(id), AlertTransition::Unchanged)
            }
        };
        self.state = next;
        transition
    }

    fn count_high(count: u32, peak_z: f64, debounce: u32) -> (TrackerState, AlertTransition) {
        if count >= debounce {
            let id = AlertId::new();
            (
                TrackerState::Open(id.clone()),
                AlertTransition::Opened { id, peak_z },
            )
        } else {
            (
                TrackerState::Alerting { count, peak_z },
                AlertTransition::Unchanged,
            )
        }
    }

    fn count_low(count: u32, id: AlertId, debounce: u32) -> (TrackerState, AlertTransition) {
        if count >= debounce {
            (TrackerState::Normal, AlertTransition::Resolved(id))
        } else {
            (
                TrackerState::Resolving { count, id },
                AlertTransition::Unchanged,
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStateFilter {
    #[default]
    Any,
    Open,
    Resolved,
}

/// Predicate over alerts; every `None` field matches anything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub agent_id: Option<AgentId>,
    pub metric: Option<Metric>,
    pub min_severity: Option<AlertSeverity>,
    pub state: AlertStateFilter,
    /// `Some(false)` keeps only alerts nobody has acknowledged yet.
    pub acknowledged: Option<bool>,
}

impl AlertFilter {
    pub fn open() -> Self {
        Self {
            state: AlertStateFilter::Open,
            ..Self::default()
        }
    }

    pub fn for_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn at_least(mut self, severity: AlertSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = Some(acknowledged);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if self.agent_id.as_ref().is_some_and(|a| *a != alert.agent_id) {
            return false;
        }
        if self.metric.is_some_and(|m| m != alert.metric) {
            return false;
        }
        if self.min_severity.is_some_and(|s| alert.severity < s) {
            return false;
        }
        if self.acknowledged.is_some_and(|a| a != alert.is_acknowledged()) {
            return false;
        }
        match self.state {
            AlertStateFilter::Any => true,
            AlertStateFilter::Open => alert.is_open(),
            AlertStateFilter::Resolved => !alert.is_open(),
        }
    }
}
