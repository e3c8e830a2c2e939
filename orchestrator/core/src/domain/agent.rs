// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity
//!
//! Agents are the independent reporting units the warden monitors. Each one is
//! addressed by a free-form [`AgentId`] (`runtime-1`, `shader-pipeline-a`) and
//! belongs to exactly one [`AgentRole`] of the fixed fleet topology.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, operator-chosen identifier of a reporting agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role an agent plays in the fleet. Used for one-hot feature encoding and
/// per-role analytics, so the order of variants is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Versioning,
    BuildPipeline,
    Runtime,
    DeveloperTools,
    ShaderPipeline,
    Orchestrator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Versioning,
        AgentRole::BuildPipeline,
        AgentRole::Runtime,
        AgentRole::DeveloperTools,
        AgentRole::ShaderPipeline,
        AgentRole::Orchestrator,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Versioning => "versioning",
            AgentRole::BuildPipeline => "build_pipeline",
            AgentRole::Runtime => "runtime",
            AgentRole::DeveloperTools => "developer_tools",
            AgentRole::ShaderPipeline => "shader_pipeline",
            AgentRole::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_indices_are_dense() {
        for (i, role) in AgentRole::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
    }

    #[test]
    fn test_agent_id_blank_is_empty() {
        assert!(AgentId::new("   ").is_empty());
        assert!(!AgentId::new("runtime-1").is_empty());
    }
}
