// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types and functions of the warden: reports, recovery lifecycle,
//! health model, alerting, classification and prediction.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** No I/O and no tasks; everything here is deterministic

pub mod agent;
pub mod alert;
pub mod audit;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod error_report;
pub mod events;
pub mod executor;
pub mod health;
pub mod history;
pub mod predictor;
pub mod recovery;
pub mod statistics;
