// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Health Model
//!
//! Health is derived, never set: an agent's [`HealthStatus`] is a pure function
//! of its rolling metric statistics and the time since its last heartbeat.
//!
//! ## Score → Status
//! | Score | Status |
//! |-------|--------|
//! | ≥ 0.95 | `Excellent` |
//! | ≥ 0.85 | `Good` |
//! | ≥ 0.70 | `Fair` |
//! | ≥ 0.50 | `Poor` |
//! | below | `Critical` |
//! | no heartbeat within timeout | `Failed` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::agent::AgentId;
use crate::domain::statistics::Trend;

/// Health metrics an agent can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    NetworkLatency,
    ErrorRate,
    ResponseTime,
    Throughput,
    Availability,
    Temperature,
    PowerConsumption,
    CacheHitRate,
    QueueDepth,
}

impl Metric {
    pub const ALL: [Metric; 12] = [
        Metric::CpuUsage,
        Metric::MemoryUsage,
        Metric::DiskUsage,
        Metric::NetworkLatency,
        Metric::ErrorRate,
        Metric::ResponseTime,
        Metric::Throughput,
        Metric::Availability,
        Metric::Temperature,
        Metric::PowerConsumption,
        Metric::CacheHitRate,
        Metric::QueueDepth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::CpuUsage => "cpu_usage",
            Metric::MemoryUsage => "memory_usage",
            Metric::DiskUsage => "disk_usage",
            Metric::NetworkLatency => "network_latency",
            Metric::ErrorRate => "error_rate",
            Metric::ResponseTime => "response_time",
            Metric::Throughput => "throughput",
            Metric::Availability => "availability",
            Metric::Temperature => "temperature",
            Metric::PowerConsumption => "power_consumption",
            Metric::CacheHitRate => "cache_hit_rate",
            Metric::QueueDepth => "queue_depth",
        }
    }

    /// Operator-facing suggestion attached to alerts on this metric.
    pub fn resolution_hint(self) -> &'static str {
        match self {
            Metric::CpuUsage => "Reduce load on the agent or scale its workload down",
            Metric::MemoryUsage => "Check for leaks; restart the agent if usage keeps climbing",
            Metric::DiskUsage => "Free disk space or rotate logs and build artifacts",
            Metric::NetworkLatency => "Inspect network paths and upstream dependencies",
            Metric::ErrorRate => "Inspect recent error reports for a common root cause",
            Metric::ResponseTime => "Profile the slow path; consider graceful degradation",
            Metric::Throughput => "Check for stalled workers or upstream back-pressure",
            Metric::Availability => "Verify the agent is reachable and its dependencies are up",
            Metric::Temperature => "Check cooling and reduce sustained load",
            Metric::PowerConsumption => "Review power limits and sustained utilisation",
            Metric::CacheHitRate => "Check cache sizing and invalidation patterns",
            Metric::QueueDepth => "Add consumers or shed load upstream",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a metric contributes to the agent score.
///
/// `ideal` is the value scoring 1.0 and `limit` the value scoring 0.0; either
/// may be the larger one, so lower-is-worse metrics (availability, cache hit
/// rate) are expressed by `ideal > limit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPolicy {
    pub weight: f64,
    pub ideal: f64,
    pub limit: f64,
}

impl MetricPolicy {
    pub const fn new(weight: f64, ideal: f64, limit: f64) -> Self {
        Self { weight, ideal, limit }
    }

    /// Normalised sub-score in `[0, 1]`.
    pub fn score(&self, value: f64) -> f64 {
        let span = self.limit - self.ideal;
        if span == 0.0 || !value.is_finite() {
            return if value == self.ideal { 1.0 } else { 0.0 };
        }
        let t = ((value - self.ideal) / span).clamp(0.0, 1.0);
        1.0 - t
    }

    /// True when a larger reading moves the metric toward its limit.
    pub fn rising_is_worse(&self) -> bool {
        self.limit >= self.ideal
    }

    /// Orients a z-score so that deviation toward `limit` is positive.
    pub fn oriented(&self, z: f64) -> f64 {
        if self.rising_is_worse() {
            z
        } else {
            -z
        }
    }
}

pub fn default_metric_policies() -> BTreeMap<Metric, MetricPolicy> {
    BTreeMap::from([
        (Metric::CpuUsage, MetricPolicy::new(1.0, 0.0, 100.0)),
        (Metric::MemoryUsage, MetricPolicy::new(1.0, 0.0, 100.0)),
        (Metric::DiskUsage, MetricPolicy::new(0.5, 0.0, 100.0)),
        (Metric::NetworkLatency, MetricPolicy::new(0.75, 0.0, 1_000.0)),
        (Metric::ErrorRate, MetricPolicy::new(1.5, 0.0, 5.0)),
        (Metric::ResponseTime, MetricPolicy::new(1.0, 0.0, 2_000.0)),
        (Metric::Throughput, MetricPolicy::new(0.5, 1_000.0, 0.0)),
        (Metric::Availability, MetricPolicy::new(1.5, 100.0, 90.0)),
        (Metric::Temperature, MetricPolicy::new(0.25, 40.0, 95.0)),
        (Metric::PowerConsumption, MetricPolicy::new(0.25, 0.0, 500.0)),
        (Metric::CacheHitRate, MetricPolicy::new(0.5, 1.0, 0.0)),
        (Metric::QueueDepth, MetricPolicy::new(0.75, 0.0, 10_000.0)),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
    Failed,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            HealthStatus::Excellent
        } else if score >= 0.85 {
            HealthStatus::Good
        } else if score >= 0.70 {
            HealthStatus::Fair
        } else if score >= 0.50 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
            HealthStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one tracked metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub samples: usize,
    pub last: Option<f64>,
    pub mean: f64,
    pub stddev: f64,
    pub slope: f64,
    pub trend: Trend,
    pub score: f64,
}

/// Read-only snapshot handed out by the health aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthState {
    pub agent_id: AgentId,
    pub status: HealthStatus,
    pub score: f64,
    pub metrics: BTreeMap<Metric, MetricSummary>,
    pub consecutive_error_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub recent_error_rate: f64,
    pub open_alerts: usize,
}

/// Fleet-wide roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub worst_status: HealthStatus,
    pub mean_score: f64,
    pub agents: usize,
    pub by_status: BTreeMap<HealthStatus, usize>,
    pub open_alerts: usize,
}
