// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::alert::{Alert, AlertId, AlertThresholds};
use crate::domain::error_report::{ErrorCategory, ErrorId, Severity};
use crate::domain::health::{HealthStatus, Metric};
use crate::domain::recovery::{AttemptOutcome, RecoveryStrategy, SelectionReason};

/// Lifecycle of one error report, from ingestion to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecoveryEvent {
    ErrorReceived {
        error_id: ErrorId,
        agent_id: AgentId,
        category: ErrorCategory,
        severity: Severity,
        received_at: DateTime<Utc>,
    },
    ErrorClassified {
        error_id: ErrorId,
        agent_id: AgentId,
        category: ErrorCategory,
        inferred: bool,
        classified_at: DateTime<Utc>,
    },
    PredictionGenerated {
        error_id: ErrorId,
        agent_id: AgentId,
        predictor: String,
        confidence: f64,
        recommended_strategy: Option<RecoveryStrategy>,
        generated_at: DateTime<Utc>,
    },
    StrategySelected {
        error_id: ErrorId,
        agent_id: AgentId,
        strategy: RecoveryStrategy,
        reason: SelectionReason,
        attempt_number: u32,
        selected_at: DateTime<Utc>,
    },
    AttemptStarted {
        error_id: ErrorId,
        agent_id: AgentId,
        strategy: RecoveryStrategy,
        attempt_number: u32,
        deadline: DateTime<Utc>,
        started_at: DateTime<Utc>,
    },
    AttemptCompleted {
        error_id: ErrorId,
        agent_id: AgentId,
        strategy: RecoveryStrategy,
        attempt_number: u32,
        outcome: AttemptOutcome,
        duration_ms: u64,
        detail: Option<String>,
        completed_at: DateTime<Utc>,
    },
    ManualRecoveryRequested {
        error_id: ErrorId,
        agent_id: AgentId,
        strategy: RecoveryStrategy,
        requested_at: DateTime<Utc>,
    },
    ReportResolved {
        error_id: ErrorId,
        agent_id: AgentId,
        strategy: RecoveryStrategy,
        total_attempts: u32,
        resolved_at: DateTime<Utc>,
    },
    ReportEscalated {
        error_id: ErrorId,
        agent_id: AgentId,
        total_attempts: u32,
        reason: String,
        escalated_at: DateTime<Utc>,
    },
    ReportAbandoned {
        error_id: ErrorId,
        agent_id: AgentId,
        reason: String,
        abandoned_at: DateTime<Utc>,
    },
}

impl RecoveryEvent {
    pub fn error_id(&self) -> &ErrorId {
        match self {
            RecoveryEvent::ErrorReceived { error_id, .. }
            | RecoveryEvent::ErrorClassified { error_id, .. }
            | RecoveryEvent::PredictionGenerated { error_id, .. }
            | RecoveryEvent::StrategySelected { error_id, .. }
            | RecoveryEvent::AttemptStarted { error_id, .. }
            | RecoveryEvent::AttemptCompleted { error_id, .. }
            | RecoveryEvent::ManualRecoveryRequested { error_id, .. }
            | RecoveryEvent::ReportResolved { error_id, .. }
            | RecoveryEvent::ReportEscalated { error_id, .. }
            | RecoveryEvent::ReportAbandoned { error_id, .. } => error_id,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        match self {
            RecoveryEvent::ErrorReceived { agent_id, .. }
            | RecoveryEvent::ErrorClassified { agent_id, .. }
            | RecoveryEvent::PredictionGenerated { agent_id, .. }
            | RecoveryEvent::StrategySelected { agent_id, .. }
            | RecoveryEvent::AttemptStarted { agent_id, .. }
            | RecoveryEvent::AttemptCompleted { agent_id, .. }
            | RecoveryEvent::ManualRecoveryRequested { agent_id, .. }
            | RecoveryEvent::ReportResolved { agent_id, .. }
            | RecoveryEvent::ReportEscalated { agent_id, .. }
            | RecoveryEvent::ReportAbandoned { agent_id, .. } => agent_id,
        }
    }

    /// Short label used for audit entries and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryEvent::ErrorReceived { .. } => "error_received",
            RecoveryEvent::ErrorClassified { .. } => "error_classified",
            RecoveryEvent::PredictionGenerated { .. } => "prediction_generated",
            RecoveryEvent::StrategySelected { .. } => "strategy_selected",
            RecoveryEvent::AttemptStarted { .. } => "attempt_started",
            RecoveryEvent::AttemptCompleted { .. } => "attempt_completed",
            RecoveryEvent::ManualRecoveryRequested { .. } => "manual_recovery_requested",
            RecoveryEvent::ReportResolved { .. } => "report_resolved",
            RecoveryEvent::ReportEscalated { .. } => "report_escalated",
            RecoveryEvent::ReportAbandoned { .. } => "report_abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryEvent::ReportResolved { .. }
                | RecoveryEvent::ReportEscalated { .. }
                | RecoveryEvent::ReportAbandoned { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthEvent {
    StatusChanged {
        agent_id: AgentId,
        from: HealthStatus,
        to: HealthStatus,
        score: f64,
        changed_at: DateTime<Utc>,
    },
    AlertRaised {
        alert: Alert,
    },
    AlertResolved {
        alert_id: AlertId,
        agent_id: AgentId,
        metric: Metric,
        resolved_at: DateTime<Utc>,
    },
    AlertAcknowledged {
        alert_id: AlertId,
        agent_id: AgentId,
        metric: Metric,
        acknowledged_at: DateTime<Utc>,
    },
    /// `None` means the override was cleared and the configured thresholds
    /// apply again.
    AlertThresholdsChanged {
        agent_id: AgentId,
        metric: Metric,
        thresholds: Option<AlertThresholds>,
        changed_at: DateTime<Utc>,
    },
    HeartbeatMissed {
        agent_id: AgentId,
        last_heartbeat: Option<DateTime<Utc>>,
        detected_at: DateTime<Utc>,
    },
}

impl HealthEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HealthEvent::StatusChanged { .. } => "status_changed",
            HealthEvent::AlertRaised { .. } => "alert_raised",
            HealthEvent::AlertResolved { .. } => "alert_resolved",
            HealthEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            HealthEvent::AlertThresholdsChanged { .. } => "alert_thresholds_changed",
            HealthEvent::HeartbeatMissed { .. } => "heartbeat_missed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CheckpointEvent {
    CheckpointCreated {
        key: String,
        size_bytes: usize,
        replaced: bool,
        created_at: DateTime<Utc>,
    },
    CheckpointEvicted {
        key: String,
        evicted_at: DateTime<Utc>,
    },
    CheckpointRestored {
        key: String,
        size_bytes: usize,
        restored_at: DateTime<Utc>,
    },
}

impl CheckpointEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointEvent::CheckpointCreated { .. } => "checkpoint_created",
            CheckpointEvent::CheckpointEvicted { .. } => "checkpoint_evicted",
            CheckpointEvent::CheckpointRestored { .. } => "checkpoint_restored",
        }
    }
}
