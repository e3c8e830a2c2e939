// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Warden Core
//!
//! Error-recovery and health-monitoring coordinator for a fleet of reporting
//! agents. Start with [`application::orchestrator::Orchestrator`].
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, coordinator services and in-process adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
