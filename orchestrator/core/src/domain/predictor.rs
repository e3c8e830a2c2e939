// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Failure Prediction
//!
//! [`FailurePredictor`] is the seam where a scoring model plugs into the
//! recovery coordinator. [`HeuristicPredictor`] is the shipped implementation:
//! a fixed weight table dotted with the feature vector and squashed through a
//! logistic function.
//!
//! A recommendation is only attached when the confidence clears the configured
//! threshold; below it the coordinator falls back to its default selection.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::agent::AgentRole;
use crate::domain::classifier::{
    FeatureVector, CONSECUTIVE_ERRORS_FEATURE, CPU_FEATURE, HEALTH_DEFICIT_FEATURE, MEMORY_FEATURE,
};
use crate::domain::error_report::{ErrorCategory, Severity};
use crate::domain::recovery::RecoveryStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Likelihood of near-term failure in `[0, 1]`.
    pub confidence: f64,
    pub recommended_strategy: Option<RecoveryStrategy>,
    #[serde(default, with = "humantime_serde")]
    pub estimated_time_to_failure: Option<Duration>,
}

impl Prediction {
    pub fn none() -> Self {
        Self {
            confidence: 0.0,
            recommended_strategy: None,
            estimated_time_to_failure: None,
        }
    }
}

pub trait FailurePredictor: Send + Sync {
    /// `recent_error_rate` is the reporting agent's errors per minute.
    fn predict(&self, features: &FeatureVector, recent_error_rate: f64) -> Prediction;

    /// Feedback hook for learning implementations. The heuristic ignores it.
    fn record_outcome(&self, _features: &FeatureVector, _strategy: RecoveryStrategy, _succeeded: bool) {}

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictorError {
    #[error("weight table has {actual} entries, feature vector has {expected}")]
    WeightTableMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct HeuristicPredictor {
    weights: Vec<f64>,
    bias: f64,
    error_rate_weight: f64,
    /// Errors per minute at which the error-rate term saturates.
    error_rate_scale: f64,
    threshold: f64,
}

impl HeuristicPredictor {
    pub fn new(threshold: f64) -> Self {
        let mut weights = vec![0.0; FeatureVector::LEN];
        let severity_offset = AgentRole::COUNT;
        let category_offset = severity_offset + Severity::COUNT;

        for severity in Severity::ALL {
            weights[severity_offset + severity.index()] = match severity {
                Severity::Info => -1.5,
                Severity::Warning => -0.5,
                Severity::Error => 1.0,
                Severity::Critical => 2.5,
            };
        }
        for category in ErrorCategory::ALL {
            weights[category_offset + category.index()] = match category {
                ErrorCategory::Memory | ErrorCategory::Security | ErrorCategory::Hardware => 1.0,
                ErrorCategory::Concurrency => 0.8,
                ErrorCategory::Performance | ErrorCategory::Runtime => 0.5,
                ErrorCategory::Network | ErrorCategory::Filesystem => 0.3,
                ErrorCategory::Configuration => 0.2,
                ErrorCategory::Compilation => -0.5,
                ErrorCategory::Unknown => 0.0,
            };
        }
        weights[MEMORY_FEATURE] = 1.5;
        weights[CPU_FEATURE] = 1.0;
        weights[CONSECUTIVE_ERRORS_FEATURE] = 2.0;
        weights[HEALTH_DEFICIT_FEATURE] = 2.0;

        Self {
            weights,
            bias: -2.0,
            error_rate_weight: 1.0,
            error_rate_scale: 10.0,
            threshold,
        }
    }

    /// Replace the weight table; it must match the feature layout.
    pub fn with_weights(mut self, weights: Vec<f64>, bias: f64) -> Result<Self, PredictorError> {
        if weights.len() != FeatureVector::LEN {
            return Err(PredictorError::WeightTableMismatch {
                expected: FeatureVector::LEN,
                actual: weights.len(),
            });
        }
        self.weights = weights;
        self.bias = bias;
        Ok(self)
    }

    pub fn score(&self, features: &FeatureVector, recent_error_rate: f64) -> f64 {
        let rate = if recent_error_rate.is_finite() {
            (recent_error_rate / self.error_rate_scale).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let z = self.bias + features.dot(&self.weights) + self.error_rate_weight * rate;
        logistic(z)
    }
}

impl Default for HeuristicPredictor {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl FailurePredictor for HeuristicPredictor {
    fn predict(&self, features: &FeatureVector, recent_error_rate: f64) -> Prediction {
        let confidence = self.score(features, recent_error_rate);
        if confidence <= self.threshold {
            return Prediction {
                confidence,
                recommended_strategy: None,
                estimated_time_to_failure: None,
            };
        }

        let category = features.category().unwrap_or(ErrorCategory::Unknown);
        let high = features.severity().is_some_and(|s| s >= Severity::Error);
        Prediction {
            confidence,
            recommended_strategy: Some(recommend(category, high)),
            estimated_time_to_failure: Some(time_to_failure(confidence)),
        }
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Strategy table keyed on category and a two-level severity bucket.
pub fn recommend(category: ErrorCategory, high_severity: bool) -> RecoveryStrategy {
    use RecoveryStrategy::*;
    match (category, high_severity) {
        (ErrorCategory::Memory, false) => GracefulDegradation,
        (ErrorCategory::Memory, true) => Restart,
        (ErrorCategory::Performance, false) => GracefulDegradation,
        (ErrorCategory::Performance, true) => ScaleDown,
        (ErrorCategory::Security, _) => Isolate,
        (ErrorCategory::Network, false) => Retry,
        (ErrorCategory::Network, true) => Fallback,
        (ErrorCategory::Filesystem, false) => Retry,
        (ErrorCategory::Filesystem, true) => Rollback,
        (ErrorCategory::Concurrency, false) => Retry,
        (ErrorCategory::Concurrency, true) => Restart,
        (ErrorCategory::Hardware, false) => GracefulDegradation,
        (ErrorCategory::Hardware, true) => Isolate,
        (ErrorCategory::Configuration, _) => Rollback,
        (ErrorCategory::Runtime, false) => Retry,
        (ErrorCategory::Runtime, true) => Restart,
        (ErrorCategory::Compilation, _) => Rollback,
        (ErrorCategory::Unknown, false) => Retry,
        (ErrorCategory::Unknown, true) => Fallback,
    }
}

/// Crude horizon: one hour at the threshold, shrinking toward a minute as
/// confidence approaches certainty.
fn time_to_failure(confidence: f64) -> Duration {
    let remaining = (1.0 - confidence).clamp(0.0, 1.0);
    Duration::from_secs(60 + (remaining * 3_540.0) as u64)
}
