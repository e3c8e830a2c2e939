// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Reports
//!
//! An [`ErrorReport`] is the immutable fact an agent hands to the warden when
//! something goes wrong. It is validated once on ingestion, consumed once by
//! the recovery coordinator and then retained in the bounded report history.
//!
//! | Type | Role |
//! |------|------|
//! | [`ErrorId`] | unique report identifier |
//! | [`Severity`] | ordered `Info < Warning < Error < Critical` |
//! | [`ErrorCategory`] | fixed taxonomy used for classification and strategy tables |
//! | [`ValidationError`] | typed rejection of malformed input |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::{AgentId, AgentRole};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(pub String);

impl ErrorId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Memory,
    Performance,
    Security,
    Network,
    Filesystem,
    Concurrency,
    Hardware,
    Configuration,
    Runtime,
    Compilation,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Memory,
        ErrorCategory::Performance,
        ErrorCategory::Security,
        ErrorCategory::Network,
        ErrorCategory::Filesystem,
        ErrorCategory::Concurrency,
        ErrorCategory::Hardware,
        ErrorCategory::Configuration,
        ErrorCategory::Runtime,
        ErrorCategory::Compilation,
        ErrorCategory::Unknown,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Memory => "memory",
            ErrorCategory::Performance => "performance",
            ErrorCategory::Security => "security",
            ErrorCategory::Network => "network",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Concurrency => "concurrency",
            ErrorCategory::Hardware => "hardware",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Compilation => "compilation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional pointer to the code that raised the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: ErrorId,
    pub agent_id: AgentId,
    pub source_agent: AgentRole,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub thread_id: u64,
    pub message: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub memory_usage_bytes: u64,
    #[serde(default)]
    pub cpu_usage_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("context is {len} bytes, limit is {max}")]
    ContextTooLong { len: usize, max: usize },
    #[error("field `{0}` must be a finite number")]
    NonFinite(&'static str),
}

impl ErrorReport {
    /// Create a report stamped with a fresh id and the current time.
    pub fn new(
        agent_id: impl Into<AgentId>,
        source_agent: AgentRole,
        severity: Severity,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: ErrorId::new(),
            agent_id: agent_id.into(),
            source_agent,
            severity,
            category,
            timestamp: Utc::now(),
            thread_id: 0,
            message: message.into(),
            context: String::new(),
            memory_usage_bytes: 0,
            cpu_usage_percent: 0.0,
            error_code: None,
            location: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = ErrorId::from_string(id);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_resource_usage(mut self, memory_usage_bytes: u64, cpu_usage_percent: f64) -> Self {
        self.memory_usage_bytes = memory_usage_bytes;
        self.cpu_usage_percent = cpu_usage_percent;
        self
    }

    pub fn with_thread_id(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_error_code(mut self, code: u32) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.location = Some(SourceLocation {
            file: file.into(),
            line,
            function: None,
        });
        self
    }

    /// Reject reports the coordinator cannot act on.
    ///
    /// Numeric resource fields are not checked; the classifier clamps them.
    pub fn validate(&self, max_context_len: usize) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if self.agent_id.is_empty() {
            return Err(ValidationError::EmptyField("agent_id"));
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyField("message"));
        }
        if self.context.len() > max_context_len {
            return Err(ValidationError::ContextTooLong {
                len: self.context.len(),
                max: max_context_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ErrorReport {
        ErrorReport::new(
            "runtime-1",
            AgentRole::Runtime,
            Severity::Error,
            ErrorCategory::Network,
            "connection reset",
        )
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_valid_report_passes() {
        assert!(report().validate(512).is_ok());
    }

    #[test]
    fn test_empty_agent_rejected() {
        let mut r = report();
        r.agent_id = AgentId::new("");
        assert_eq!(r.validate(512), Err(ValidationError::EmptyField("agent_id")));
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut r = report();
        r.message = "  ".to_string();
        assert_eq!(r.validate(512), Err(ValidationError::EmptyField("message")));
    }

    #[test]
    fn test_oversized_context_rejected() {
        let r = report().with_context("x".repeat(600));
        assert_eq!(
            r.validate(512),
            Err(ValidationError::ContextTooLong { len: 600, max: 512 })
        );
    }

    #[test]
    fn test_unknown_category_deserializes_from_snake_case() {
        let c: ErrorCategory = serde_json::from_str("\"filesystem\"").unwrap();
        assert_eq!(c, ErrorCategory::Filesystem);
        assert!(serde_json::from_str::<Severity>("\"fatal\"").is_err());
    }
}
