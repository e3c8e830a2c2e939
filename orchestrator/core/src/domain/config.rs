// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Warden Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) for one recovery
// coordinator instance:
// - recovery budgets, deadlines and the escalation ladder
// - ingestion queue and report history sizing
// - health windows, heartbeat timeout and alert hysteresis
// - checkpoint store limits and audit output

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::alert::AlertThresholds;
use crate::domain::error_report::Severity;
use crate::domain::health::{default_metric_policies, Metric, MetricPolicy};
use crate::domain::recovery::{EscalationLadder, RecoveryStrategy};

pub const API_VERSION: &str = "warden.100monkeys.ai/v1";
pub const KIND: &str = "RecoveryCoordinator";

/// Top-level Kubernetes-style warden configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfigManifest {
    /// API version (must be "warden.100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "RecoveryCoordinator")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: WardenConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfigSpec {
    pub recovery: RecoveryConfig,
    pub ingestion: IngestionConfig,
    pub health: HealthConfig,
    pub checkpoints: CheckpointConfig,
    pub classifier: ClassifierConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts allowed per report, automatic and manual combined
    pub max_recovery_attempts: u32,

    /// Strategy executions allowed to run at once
    pub max_parallel_recoveries: usize,

    /// Deadline for strategies without an entry in `strategy_timeouts`
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    pub strategy_timeouts: BTreeMap<RecoveryStrategy, humantime_serde::Serde<Duration>>,

    pub prediction_threshold: f64,

    /// Reports below this severity are recorded but not auto-recovered
    pub auto_recovery_min_severity: Severity,

    pub escalation_ladder: EscalationLadder,
}

impl RecoveryConfig {
    pub fn timeout_for(&self, strategy: RecoveryStrategy) -> Duration {
        self.strategy_timeouts
            .get(&strategy)
            .map(|d| **d)
            .unwrap_or(self.recovery_timeout)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            max_parallel_recoveries: 16,
            recovery_timeout: Duration::from_millis(50),
            strategy_timeouts: BTreeMap::from([
                (RecoveryStrategy::Restart, Duration::from_millis(250).into()),
                (RecoveryStrategy::Rollback, Duration::from_millis(250).into()),
            ]),
            prediction_threshold: 0.7,
            auto_recovery_min_severity: Severity::Error,
            escalation_ladder: EscalationLadder::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Reports buffered between submission and the dispatcher
    pub queue_capacity: usize,

    /// Reports retained for analytics and manual recovery
    pub history_capacity: usize,

    pub max_context_len: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            history_capacity: 4096,
            max_context_len: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Samples kept per (agent, metric)
    pub window_capacity: usize,

    /// Recent samples averaged into a metric's sub-score
    pub status_window: usize,

    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub heartbeat_check_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub error_rate_window: Duration,

    pub alert: AlertThresholds,

    /// Resolved alerts kept for `alerts()` queries
    pub resolved_alert_retention: usize,

    pub metrics: BTreeMap<Metric, MetricPolicy>,
}

impl HealthConfig {
    pub fn policy(&self, metric: Metric) -> MetricPolicy {
        self.metrics
            .get(&metric)
            .copied()
            .or_else(|| default_metric_policies().get(&metric).copied())
            .unwrap_or(MetricPolicy::new(1.0, 0.0, 1.0))
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_capacity: 256,
            status_window: 8,
            heartbeat_timeout: Duration::from_secs(5),
            heartbeat_check_interval: Duration::from_secs(1),
            error_rate_window: Duration::from_secs(60),
            alert: AlertThresholds::default(),
            resolved_alert_retention: 1024,
            metrics: default_metric_policies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub capacity: usize,
    pub max_payload_bytes: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Memory usage that maps to a feature value of 1.0
    pub max_memory_bytes: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 8 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Append-only JSON-lines audit file (optional, defaults to tracing only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,

    /// Events buffered per subscriber before it starts lagging
    pub event_bus_capacity: usize,

    /// Entries queued for the audit file writer before new ones are dropped
    pub audit_queue_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            audit_log_path: None,
            event_bus_capacity: 1000,
            audit_queue_capacity: 4096,
        }
    }
}

impl Default for WardenConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "warden".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: WardenConfigSpec::default(),
        }
    }
}

impl WardenConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WARDEN_CONFIG_PATH environment variable
    /// 2. ./warden-config.yaml (working directory)
    /// 3. ~/.warden/config.yaml (user home)
    /// 4. /etc/warden/config.yaml (system, Unix) or C:\ProgramData\Warden\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WARDEN_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./warden-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".warden").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/warden/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Warden\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override::<usize>("WARDEN_MAX_PARALLEL_RECOVERIES") {
            self.spec.recovery.max_parallel_recoveries = v;
        }
        if let Some(v) = env_override::<u32>("WARDEN_MAX_RECOVERY_ATTEMPTS") {
            self.spec.recovery.max_recovery_attempts = v;
        }
        if let Some(v) = env_override::<f64>("WARDEN_PREDICTION_THRESHOLD") {
            self.spec.recovery.prediction_threshold = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let recovery = &self.spec.recovery;
        if recovery.max_recovery_attempts == 0 {
            anyhow::bail!("spec.recovery.max_recovery_attempts must be at least 1");
        }
        if recovery.max_parallel_recoveries == 0 {
            anyhow::bail!("spec.recovery.max_parallel_recoveries must be at least 1");
        }
        if recovery.recovery_timeout.is_zero() {
            anyhow::bail!("spec.recovery.recovery_timeout must be greater than zero");
        }
        for (strategy, timeout) in &recovery.strategy_timeouts {
            if timeout.is_zero() {
                anyhow::bail!("spec.recovery.strategy_timeouts.{} must be greater than zero", strategy);
            }
        }
        if !(recovery.prediction_threshold > 0.0 && recovery.prediction_threshold <= 1.0) {
            anyhow::bail!(
                "spec.recovery.prediction_threshold must be in (0, 1], got {}",
                recovery.prediction_threshold
            );
        }
        if let Err(e) = recovery.escalation_ladder.check() {
            anyhow::bail!("spec.recovery.escalation_ladder: {}", e);
        }

        let ingestion = &self.spec.ingestion;
        if ingestion.queue_capacity == 0 {
            anyhow::bail!("spec.ingestion.queue_capacity must be at least 1");
        }
        if ingestion.history_capacity == 0 {
            anyhow::bail!("spec.ingestion.history_capacity must be at least 1");
        }

        let health = &self.spec.health;
        if health.window_capacity == 0 {
            anyhow::bail!("spec.health.window_capacity must be at least 1");
        }
        if health.status_window == 0 {
            anyhow::bail!("spec.health.status_window must be at least 1");
        }
        if health.heartbeat_check_interval.is_zero() {
            anyhow::bail!("spec.health.heartbeat_check_interval must be greater than zero");
        }
        if health.error_rate_window.is_zero() {
            anyhow::bail!("spec.health.error_rate_window must be greater than zero");
        }
        if let Err(e) = health.alert.validate() {
            anyhow::bail!("spec.health.alert: {}", e);
        }
        for (metric, policy) in &health.metrics {
            if !(policy.weight >= 0.0 && policy.weight.is_finite()) {
                anyhow::bail!("spec.health.metrics.{}.weight must be a non-negative number", metric);
            }
            if policy.ideal == policy.limit {
                anyhow::bail!("spec.health.metrics.{}: ideal and limit must differ", metric);
            }
        }

        if self.spec.checkpoints.capacity == 0 {
            anyhow::bail!("spec.checkpoints.capacity must be at least 1");
        }
        if self.spec.classifier.max_memory_bytes == 0 {
            anyhow::bail!("spec.classifier.max_memory_bytes must be at least 1");
        }
        if self.spec.observability.event_bus_capacity == 0 {
            anyhow::bail!("spec.observability.event_bus_capacity must be at least 1");
        }
        if self.spec.observability.audit_queue_capacity == 0 {
            anyhow::bail!("spec.observability.audit_queue_capacity must be at least 1");
        }

        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            tracing::info!("Environment override: {}={}", name, raw);
            Some(v)
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", name, raw);
            None
        }
    }
}
