// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Health Aggregator
//!
//! Owns every agent's rolling metric windows, alert trackers and error-rate
//! history. All mutation for one agent happens under that agent's lock, so
//! samples and error outcomes for the same agent are serialized while
//! different agents proceed in parallel.
//!
//! Status and alerts are recomputed synchronously inside each write; the only
//! timer-driven work is the heartbeat sweep, which flips silent agents to
//! `Failed`.
//!
//! | Operation | Side effects |
//! |-----------|--------------|
//! | `record_sample` | window push, alert transition, status change |
//! | `record_error` | heartbeat, error-rate sample |
//! | `record_outcome` | consecutive error count |
//! | `sweep_heartbeats` | `HeartbeatMissed` + status change |
//! | `acknowledge_alert` | `AlertAcknowledged` on first acknowledgement |
//! | `set_agent_thresholds` | `AlertThresholdsChanged`, applies from the next sample |

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::publisher::EventPublisher;
use crate::domain::agent::AgentId;
use crate::domain::alert::{
    Alert, AlertError, AlertFilter, AlertId, AlertSeverity, AlertThresholds, AlertTracker,
    AlertTransition,
};
use crate::domain::config::HealthConfig;
use crate::domain::error_report::ValidationError;
use crate::domain::events::HealthEvent;
use crate::domain::health::{
    AgentHealthState, HealthStatus, Metric, MetricPolicy, MetricSummary, SystemHealth,
};
use crate::domain::statistics::RollingStatistics;

struct MetricTrack {
    stats: RollingStatistics,
    tracker: AlertTracker,
}

struct AgentSlot {
    agent_id: AgentId,
    metrics: BTreeMap<Metric, MetricTrack>,
    consecutive_error_count: u32,
    last_heartbeat: Option<DateTime<Utc>>,
    error_times: VecDeque<DateTime<Utc>>,
    /// Last status announced on the bus.
    published: HealthStatus,
}

impl AgentSlot {
    fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            metrics: BTreeMap::new(),
            consecutive_error_count: 0,
            last_heartbeat: None,
            error_times: VecDeque::new(),
            published: HealthStatus::Excellent,
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_heartbeat.map_or(true, |last| at > last) {
            self.last_heartbeat = Some(at);
        }
    }

    fn open_alerts(&self) -> usize {
        self.metrics
            .values()
            .filter(|t| t.tracker.open_alert().is_some())
            .count()
    }
}

struct AlertBook {
    open: HashMap<AlertId, Alert>,
    resolved: VecDeque<Alert>,
    retention: usize,
}

impl AlertBook {
    fn resolve(&mut self, id: &AlertId, at: DateTime<Utc>) -> Option<Alert> {
        let mut alert = self.open.remove(id)?;
        alert.resolved_at = Some(at);
        if self.retention > 0 {
            if self.resolved.len() >= self.retention {
                self.resolved.pop_front();
            }
            self.resolved.push_back(alert.clone());
        }
        Some(alert)
    }

    fn find_mut(&mut self, id: &AlertId) -> Option<&mut Alert> {
        if self.open.contains_key(id) {
            return self.open.get_mut(id);
        }
        self.resolved.iter_mut().find(|a| a.id == *id)
    }
}

pub struct HealthAggregator {
    config: HealthConfig,
    policies: BTreeMap<Metric, MetricPolicy>,
    agents: DashMap<AgentId, Arc<Mutex<AgentSlot>>>,
    overrides: DashMap<AgentId, HashMap<Metric, AlertThresholds>>,
    alerts: Mutex<AlertBook>,
    publisher: EventPublisher,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig, publisher: EventPublisher) -> Self {
        let policies = Metric::ALL.iter().map(|m| (*m, config.policy(*m))).collect();
        let alerts = Mutex::new(AlertBook {
            open: HashMap::new(),
            resolved: VecDeque::new(),
            retention: config.resolved_alert_retention,
        });
        Self {
            config,
            policies,
            agents: DashMap::new(),
            overrides: DashMap::new(),
            alerts,
            publisher,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn policy(&self, metric: Metric) -> MetricPolicy {
        self.policies
            .get(&metric)
            .copied()
            .unwrap_or(MetricPolicy::new(1.0, 0.0, 1.0))
    }

    fn slot(&self, agent_id: &AgentId) -> Arc<Mutex<AgentSlot>> {
        if let Some(slot) = self.agents.get(agent_id) {
            return slot.value().clone();
        }
        self.agents
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AgentSlot::new(agent_id.clone()))))
            .value()
            .clone()
    }

    fn existing_slot(&self, agent_id: &AgentId) -> Option<Arc<Mutex<AgentSlot>>> {
        self.agents.get(agent_id).map(|s| s.value().clone())
    }

    fn flush(&self, pending: Vec<HealthEvent>) {
        for event in pending {
            self.publisher.health(event);
        }
    }

    /// Append one sample and recompute the agent's status and alerts.
    pub fn record_sample(
        &self,
        agent_id: &AgentId,
        metric: Metric,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<HealthStatus, ValidationError> {
        if agent_id.is_empty() {
            return Err(ValidationError::EmptyField("agent_id"));
        }
        if !value.is_finite() {
            return Err(ValidationError::NonFinite("value"));
        }

        let slot = self.slot(agent_id);
        let mut pending = Vec::new();
        let status = {
            let mut slot = slot.lock();
            slot.touch(timestamp);
            self.push_sample(&mut slot, metric, value, timestamp, &mut pending);
            self.refresh_status(&mut slot, Utc::now(), &mut pending)
        };
        self.flush(pending);
        Ok(status)
    }

    /// Register an error from `agent_id`: refreshes its heartbeat and records
    /// the windowed error rate (errors per minute) as an `error_rate` sample.
    pub fn record_error(&self, agent_id: &AgentId, at: DateTime<Utc>) -> f64 {
        let slot = self.slot(agent_id);
        let mut pending = Vec::new();
        let rate = {
            let mut slot = slot.lock();
            slot.touch(at);
            slot.error_times.push_back(at);
            let rate = self.error_rate(&mut slot, at);
            self.push_sample(&mut slot, Metric::ErrorRate, rate, at, &mut pending);
            self.refresh_status(&mut slot, Utc::now(), &mut pending);
            rate
        };
        self.flush(pending);
        rate
    }

    /// Apply a recovery outcome to the agent's consecutive error count.
    pub fn record_outcome(&self, agent_id: &AgentId, succeeded: bool) {
        let Some(slot) = self.existing_slot(agent_id) else {
            return;
        };
        let mut slot = slot.lock();
        if succeeded {
            slot.consecutive_error_count = 0;
        } else {
            slot.consecutive_error_count = slot.consecutive_error_count.saturating_add(1);
        }
        debug!(
            agent_id = %agent_id,
            consecutive = slot.consecutive_error_count,
            "Recovery outcome applied"
        );
    }

    pub fn heartbeat(&self, agent_id: &AgentId, at: DateTime<Utc>) {
        if agent_id.is_empty() {
            return;
        }
        let slot = self.slot(agent_id);
        let mut pending = Vec::new();
        {
            let mut slot = slot.lock();
            slot.touch(at);
            self.refresh_status(&mut slot, Utc::now(), &mut pending);
        }
        self.flush(pending);
    }

    fn error_rate(&self, slot: &mut AgentSlot, now: DateTime<Utc>) -> f64 {
        let window = chrono::Duration::from_std(self.config.error_rate_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let cutoff = now - window;
        while slot.error_times.front().is_some_and(|t| *t < cutoff) {
            slot.error_times.pop_front();
        }
        let minutes = self.config.error_rate_window.as_secs_f64() / 60.0;
        slot.error_times.iter().filter(|t| **t <= now).count() as f64 / minutes.max(f64::EPSILON)
    }

    fn push_sample(
        &self,
        slot: &mut AgentSlot,
        metric: Metric,
        value: f64,
        timestamp: DateTime<Utc>,
        pending: &mut Vec<HealthEvent>,
    ) {
        let policy = self.policy(metric);
        let thresholds = self.thresholds_for(&slot.agent_id, metric);
        let agent_id = slot.agent_id.clone();
        let capacity = self.config.window_capacity;
        let track = slot.metrics.entry(metric).or_insert_with(|| MetricTrack {
            stats: RollingStatistics::new(capacity),
            tracker: AlertTracker::new(),
        });

        // Score against the window as it was before this sample.
        let z = if track.stats.len() >= thresholds.min_samples.max(2) {
            policy.oriented(track.stats.z_score(value))
        } else {
            0.0
        };
        track.stats.push(value, timestamp);

        match track.tracker.observe(z, &thresholds) {
            AlertTransition::Unchanged => {}
            AlertTransition::Opened { id, peak_z } => {
                let severity = AlertSeverity::from_overshoot(peak_z, thresholds.upper_z);
                let alert = Alert {
                    id: id.clone(),
                    agent_id: agent_id.clone(),
                    severity,
                    metric,
                    value,
                    z_score: peak_z,
                    threshold: thresholds.upper_z,
                    raised_at: Utc::now(),
                    resolved_at: None,
                    acknowledged_at: None,
                    resolution_hint: metric.resolution_hint().to_string(),
                };
                counter!(
                    "warden_alerts_raised_total",
                    "metric" => metric.as_str(),
                    "severity" => severity.as_str()
                )
                .increment(1);
                warn!(
                    alert_id = %id,
                    agent_id = %agent_id,
                    metric = %metric,
                    severity = %severity,
                    value,
                    z = peak_z,
                    "Alert raised"
                );
                self.alerts.lock().open.insert(id, alert.clone());
                pending.push(HealthEvent::AlertRaised { alert });
            }
            AlertTransition::Resolved(id) => {
                let now = Utc::now();
                if self.alerts.lock().resolve(&id, now).is_some() {
                    info!(alert_id = %id, agent_id = %agent_id, metric = %metric, "Alert resolved");
                    pending.push(HealthEvent::AlertResolved {
                        alert_id: id,
                        agent_id,
                        metric,
                        resolved_at: now,
                    });
                }
            }
        }
    }

    fn heartbeat_expired(&self, slot: &AgentSlot, now: DateTime<Utc>) -> bool {
        match slot.last_heartbeat {
            Some(last) => (now - last)
                .to_std()
                .map(|silence| silence > self.config.heartbeat_timeout)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Weighted mean of per-metric sub-scores over the recent status window.
    fn score(&self, slot: &AgentSlot) -> f64 {
        let (mut total, mut weight) = (0.0, 0.0);
        for (metric, track) in &slot.metrics {
            if track.stats.is_empty() {
                continue;
            }
            let policy = self.policy(*metric);
            let value = track.stats.recent_mean(self.config.status_window);
            total += policy.weight * policy.score(value);
            weight += policy.weight;
        }
        if weight > 0.0 {
            total / weight
        } else {
            1.0
        }
    }

    fn evaluate(&self, slot: &AgentSlot, now: DateTime<Utc>) -> (HealthStatus, f64) {
        let score = self.score(slot);
        if self.heartbeat_expired(slot, now) {
            (HealthStatus::Failed, score)
        } else {
            (HealthStatus::from_score(score), score)
        }
    }

    fn refresh_status(
        &self,
        slot: &mut AgentSlot,
        now: DateTime<Utc>,
        pending: &mut Vec<HealthEvent>,
    ) -> HealthStatus {
        let (status, score) = self.evaluate(slot, now);
        if status != slot.published {
            info!(
                agent_id = %slot.agent_id,
                from = %slot.published,
                to = %status,
                score,
                "Agent health status changed"
            );
            pending.push(HealthEvent::StatusChanged {
                agent_id: slot.agent_id.clone(),
                from: slot.published,
                to: status,
                score,
                changed_at: now,
            });
            slot.published = status;
        }
        status
    }

    fn snapshot(&self, slot: &mut AgentSlot, now: DateTime<Utc>) -> AgentHealthState {
        let (status, score) = self.evaluate(slot, now);
        let metrics = slot
            .metrics
            .iter()
            .map(|(metric, track)| {
                let policy = self.policy(*metric);
                let summary = MetricSummary {
                    samples: track.stats.len(),
                    last: track.stats.last(),
                    mean: track.stats.mean(),
                    stddev: track.stats.stddev(),
                    slope: track.stats.slope(),
                    trend: track.stats.trend(policy.rising_is_worse()),
                    score: policy.score(track.stats.recent_mean(self.config.status_window)),
                };
                (*metric, summary)
            })
            .collect();
        AgentHealthState {
            agent_id: slot.agent_id.clone(),
            status,
            score,
            metrics,
            consecutive_error_count: slot.consecutive_error_count,
            last_heartbeat: slot.last_heartbeat,
            recent_error_rate: self.error_rate(slot, now),
            open_alerts: slot.open_alerts(),
        }
    }

    /// Point-in-time copy of an agent's health; the heartbeat timeout is
    /// evaluated against the current time.
    pub fn status_of(&self, agent_id: &AgentId) -> Option<AgentHealthState> {
        let slot = self.existing_slot(agent_id)?;
        let mut slot = slot.lock();
        Some(self.snapshot(&mut slot, Utc::now()))
    }

    /// Flip agents silent for longer than the heartbeat timeout to `Failed`.
    /// Returns the agents that changed on this sweep.
    pub fn sweep_heartbeats(&self, now: DateTime<Utc>) -> Vec<AgentId> {
        let slots: Vec<_> = self.agents.iter().map(|e| e.value().clone()).collect();
        let mut failed = Vec::new();
        for slot in slots {
            let mut pending = Vec::new();
            {
                let mut slot = slot.lock();
                if slot.published == HealthStatus::Failed || !self.heartbeat_expired(&slot, now) {
                    continue;
                }
                warn!(
                    agent_id = %slot.agent_id,
                    last_heartbeat = ?slot.last_heartbeat,
                    "Agent missed its heartbeat"
                );
                pending.push(HealthEvent::HeartbeatMissed {
                    agent_id: slot.agent_id.clone(),
                    last_heartbeat: slot.last_heartbeat,
                    detected_at: now,
                });
                self.refresh_status(&mut slot, now, &mut pending);
                failed.push(slot.agent_id.clone());
            }
            self.flush(pending);
        }
        failed
    }

    /// Alerts matching `filter`, oldest first.
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let book = self.alerts.lock();
        let mut out: Vec<Alert> = book
            .resolved
            .iter()
            .chain(book.open.values())
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.raised_at);
        out
    }

    pub fn open_alerts(&self) -> Vec<Alert> {
        self.alerts(&AlertFilter::open())
    }

    /// Mark an open or retained alert as seen by an operator. Repeated calls
    /// keep the first timestamp.
    pub fn acknowledge_alert(&self, alert_id: &AlertId) -> Result<Alert, AlertError> {
        let now = Utc::now();
        let (alert, first) = {
            let mut book = self.alerts.lock();
            let alert = book
                .find_mut(alert_id)
                .ok_or_else(|| AlertError::UnknownAlert(alert_id.clone()))?;
            let first = alert.acknowledged_at.is_none();
            if first {
                alert.acknowledged_at = Some(now);
            }
            (alert.clone(), first)
        };
        if first {
            info!(alert_id = %alert_id, agent_id = %alert.agent_id, metric = %alert.metric, "Alert acknowledged");
            self.publisher.health(HealthEvent::AlertAcknowledged {
                alert_id: alert_id.clone(),
                agent_id: alert.agent_id.clone(),
                metric: alert.metric,
                acknowledged_at: now,
            });
        }
        Ok(alert)
    }

    /// Thresholds in force for one `(agent, metric)` pair.
    pub fn thresholds_for(&self, agent_id: &AgentId, metric: Metric) -> AlertThresholds {
        self.overrides
            .get(agent_id)
            .and_then(|overrides| overrides.get(&metric).copied())
            .unwrap_or(self.config.alert)
    }

    /// Override the configured thresholds for one `(agent, metric)` pair. A
    /// tracker mid-run keeps its count and is judged against the new band
    /// from the next sample.
    pub fn set_agent_thresholds(
        &self,
        agent_id: &AgentId,
        metric: Metric,
        thresholds: AlertThresholds,
    ) -> Result<(), AlertError> {
        thresholds.validate()?;
        self.overrides
            .entry(agent_id.clone())
            .or_default()
            .insert(metric, thresholds);
        info!(
            agent_id = %agent_id,
            metric = %metric,
            upper_z = thresholds.upper_z,
            lower_z = thresholds.lower_z,
            debounce = thresholds.debounce_samples,
            "Alert thresholds overridden"
        );
        self.publisher.health(HealthEvent::AlertThresholdsChanged {
            agent_id: agent_id.clone(),
            metric,
            thresholds: Some(thresholds),
            changed_at: Utc::now(),
        });
        Ok(())
    }

    /// Drop an override; returns it if one was set.
    pub fn clear_agent_thresholds(&self, agent_id: &AgentId, metric: Metric) -> Option<AlertThresholds> {
        let previous = self
            .overrides
            .get_mut(agent_id)
            .and_then(|mut overrides| overrides.remove(&metric))?;
        self.overrides
            .remove_if(agent_id, |_, overrides| overrides.is_empty());
        info!(agent_id = %agent_id, metric = %metric, "Alert threshold override cleared");
        self.publisher.health(HealthEvent::AlertThresholdsChanged {
            agent_id: agent_id.clone(),
            metric,
            thresholds: None,
            changed_at: Utc::now(),
        });
        Some(previous)
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn system_health(&self) -> SystemHealth {
        let now = Utc::now();
        let slots: Vec<_> = self.agents.iter().map(|e| e.value().clone()).collect();
        let mut by_status = BTreeMap::new();
        let mut worst = HealthStatus::Excellent;
        let mut total = 0.0;
        for slot in &slots {
            let (status, score) = self.evaluate(&slot.lock(), now);
            *by_status.entry(status).or_insert(0) += 1;
            worst = worst.max(status);
            total += score;
        }
        SystemHealth {
            worst_status: worst,
            mean_score: if slots.is_empty() {
                1.0
            } else {
                total / slots.len() as f64
            },
            agents: slots.len(),
            by_status,
            open_alerts: self.alerts.lock().open.len(),
        }
    }
}
