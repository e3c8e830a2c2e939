// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use warden_core::domain::config::WardenConfigManifest;

const ANNOTATED_TEMPLATE: &str = include_str!("../../templates/warden-config.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./warden-config.yaml)
        #[arg(short, long, default_value = "./warden-config.yaml")]
        output: PathBuf,

        /// Write the annotated template instead of bare defaults
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = WardenConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. WARDEN_CONFIG_PATH: {}",
            std::env::var("WARDEN_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./warden-config.yaml");
        println!("  4. ~/.warden/config.yaml");
        println!("  5. /etc/warden/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let recovery = &config.spec.recovery;
    println!("{}", "Recovery:".bold());
    println!("  Max attempts: {}", recovery.max_recovery_attempts);
    println!("  Max parallel: {}", recovery.max_parallel_recoveries);
    println!("  Default timeout: {:?}", recovery.recovery_timeout);
    for (strategy, timeout) in &recovery.strategy_timeouts {
        println!("    {}: {:?}", strategy, **timeout);
    }
    println!("  Prediction threshold: {}", recovery.prediction_threshold);
    println!("  Auto-recovery from: {}", recovery.auto_recovery_min_severity);
    let ladder: Vec<_> = recovery
        .escalation_ladder
        .rungs()
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!("  Escalation ladder: {}", ladder.join(" → "));
    println!();

    let ingestion = &config.spec.ingestion;
    println!("{}", "Ingestion:".bold());
    println!("  Queue capacity: {}", ingestion.queue_capacity);
    println!("  History capacity: {}", ingestion.history_capacity);
    println!();

    let health = &config.spec.health;
    println!("{}", "Health:".bold());
    println!("  Window: {} samples", health.window_capacity);
    println!("  Heartbeat timeout: {:?}", health.heartbeat_timeout);
    println!(
        "  Alerts: open above z={}, resolve below z={}, after {} samples",
        health.alert.upper_z, health.alert.lower_z, health.alert.debounce_samples
    );
    for (metric, policy) in &health.metrics {
        println!(
            "    {} (weight {}, ideal {}, limit {})",
            metric, policy.weight, policy.ideal, policy.limit
        );
    }
    println!();

    println!("{}", "Checkpoints:".bold());
    println!("  Capacity: {}", config.spec.checkpoints.capacity);
    println!("  Max payload: {} bytes", config.spec.checkpoints.max_payload_bytes);
    println!();

    println!("{}", "Observability:".bold());
    match &config.spec.observability.audit_log_path {
        Some(path) => println!("  Audit log: {}", path.display()),
        None => println!("  Audit log: {}", "(tracing only)".dimmed()),
    }
    println!(
        "  Audit queue: {} entries",
        config.spec.observability.audit_queue_capacity
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = WardenConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(&output, ANNOTATED_TEMPLATE)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        WardenConfigManifest::default()
            .to_yaml_file(&output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
