// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Synthetic load against an in-process coordinator.
//!
//! Builds an [`Orchestrator`] from the resolved configuration, registers one
//! simulated executor for every strategy, then streams health samples and
//! error reports from a fleet of fake agents. When the run drains it prints
//! the analytics snapshot, and optionally the Prometheus exposition of the
//! metrics recorded along the way.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use warden_core::application::analytics::AnalyticsSnapshot;
use warden_core::application::orchestrator::Orchestrator;
use warden_core::domain::agent::{AgentId, AgentRole};
use warden_core::domain::config::WardenConfigManifest;
use warden_core::domain::error_report::{ErrorCategory, ErrorReport, Severity};
use warden_core::domain::executor::{ExecutionOutcome, StrategyExecutor};
use warden_core::domain::health::{HealthStatus, Metric};
use warden_core::domain::recovery::{RecoveryAttempt, TerminalState};
use warden_core::infrastructure::executors::FnExecutor;

const MESSAGES: &[&str] = &[
    "allocation failed: out of memory",
    "connection reset by peer",
    "no such file or directory",
    "permission denied while opening socket",
    "deadlock detected on asset mutex",
    "linker: undefined reference",
    "missing key in pipeline config",
    "frame time stall above budget",
    "gpu device lost",
    "unexpected state",
];

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of simulated agents
    #[arg(long, default_value_t = 25)]
    pub agents: usize,

    /// Error reports to submit across the fleet
    #[arg(long, default_value_t = 1000)]
    pub reports: usize,

    /// Health samples per agent and metric
    #[arg(long, default_value_t = 32)]
    pub samples: usize,

    /// Probability that a strategy execution fails
    #[arg(long, default_value_t = 0.3)]
    pub failure_rate: f64,

    /// Simulated executor latency in milliseconds
    #[arg(long, default_value_t = 2)]
    pub latency_ms: u64,

    /// RNG seed for a reproducible run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seconds to wait for every report to settle
    #[arg(long, default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Print the analytics snapshot as JSON
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

pub async fn run(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<()> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        anyhow::bail!("--failure-rate must be within [0, 1], got {}", args.failure_rate);
    }
    if args.agents == 0 {
        anyhow::bail!("--agents must be at least 1");
    }

    let prometheus = if args.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        )
    } else {
        None
    };

    let config = WardenConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));

    let warden = Orchestrator::builder(config)
        .with_default_executor(simulated_executor(
            rng.clone(),
            args.failure_rate,
            Duration::from_millis(args.latency_ms),
        ))
        .build()
        .context("Failed to build orchestrator")?;
    warden.start();

    info!(
        seed,
        agents = args.agents,
        reports = args.reports,
        "Starting simulation"
    );

    let agents: Vec<(AgentId, AgentRole)> = (0..args.agents)
        .map(|i| {
            let role = AgentRole::ALL[i % AgentRole::COUNT];
            (AgentId::new(format!("{}-{}", role, i)), role)
        })
        .collect();

    feed_health(&warden, &agents, args.samples, &rng)?;

    let mut submitted = Vec::with_capacity(args.reports);
    let mut rejected = 0usize;
    for n in 0..args.reports {
        let report = synthetic_report(&agents, n, &rng);
        match warden.submit_error_report(report) {
            Ok(id) => submitted.push(id),
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "Report rejected");
                tokio::task::yield_now().await;
            }
        }
    }

    let mut unsettled = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.drain_timeout_secs);
    for id in &submitted {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if warden.wait_for_terminal(id, remaining).await.is_none() {
            unsettled += 1;
        }
    }

    let snapshot = warden.get_analytics();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&warden, &snapshot, seed, rejected, unsettled);
    }

    warden.shutdown().await;

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }

    Ok(())
}

fn simulated_executor(
    rng: Arc<Mutex<StdRng>>,
    failure_rate: f64,
    latency: Duration,
) -> Arc<dyn StrategyExecutor> {
    FnExecutor::shared(move |_: ErrorReport, attempt: RecoveryAttempt| {
        let fails = rng.lock().random_bool(failure_rate);
        async move {
            tokio::time::sleep(latency).await;
            if fails {
                ExecutionOutcome::failed(format!("simulated {} failure", attempt.strategy))
            } else {
                ExecutionOutcome::Succeeded
            }
        }
    })
}

fn feed_health(
    warden: &Orchestrator,
    agents: &[(AgentId, AgentRole)],
    samples: usize,
    rng: &Mutex<StdRng>,
) -> Result<()> {
    for (agent, _) in agents {
        warden.heartbeat(agent);
        for _ in 0..samples {
            let (cpu, memory, latency) = {
                let mut r = rng.lock();
                (
                    r.random_range(10.0..60.0),
                    r.random_range(20.0..70.0),
                    r.random_range(5.0..120.0),
                )
            };
            let now = Utc::now();
            warden.submit_health_sample(agent, Metric::CpuUsage, cpu, now)?;
            warden.submit_health_sample(agent, Metric::MemoryUsage, memory, now)?;
            warden.submit_health_sample(agent, Metric::NetworkLatency, latency, now)?;
        }
    }
    Ok(())
}

fn synthetic_report(agents: &[(AgentId, AgentRole)], n: usize, rng: &Mutex<StdRng>) -> ErrorReport {
    let (agent_idx, severity_roll, category_idx, message_idx, memory, cpu) = {
        let mut r = rng.lock();
        (
            r.random_range(0..agents.len()),
            r.random_range(0.0..1.0),
            r.random_range(0..ErrorCategory::COUNT),
            r.random_range(0..MESSAGES.len()),
            r.random_range(0..4_u64 << 30),
            r.random_range(0.0..100.0),
        )
    };
    let (agent, role) = &agents[agent_idx];
    let severity = match severity_roll {
        x if x < 0.10 => Severity::Info,
        x if x < 0.30 => Severity::Warning,
        x if x < 0.90 => Severity::Error,
        _ => Severity::Critical,
    };
    // A share of reports arrive uncategorised to exercise inference.
    let category = if category_idx % 3 == 0 {
        ErrorCategory::Unknown
    } else {
        ErrorCategory::ALL[category_idx]
    };

    ErrorReport::new(agent.clone(), *role, severity, category, MESSAGES[message_idx])
        .with_context(format!("simulated report #{n}"))
        .with_resource_usage(memory, cpu)
}

fn print_summary(
    warden: &Orchestrator,
    snapshot: &AnalyticsSnapshot,
    seed: u64,
    rejected: usize,
    unsettled: usize,
) {
    println!("{}", "Simulation summary".bold());
    println!("  Seed: {}", seed);
    println!("  Errors received: {}", snapshot.total_errors);
    if rejected > 0 {
        println!("  Rejected at ingestion: {}", rejected.to_string().yellow());
    }
    if unsettled > 0 {
        println!("  Still running at drain timeout: {}", unsettled.to_string().yellow());
    }
    println!();

    println!("{}", "Outcomes:".bold());
    println!("  {}: {}", TerminalState::Resolved, snapshot.resolved.to_string().green());
    println!("  {}: {}", TerminalState::Escalated, snapshot.escalated.to_string().red());
    println!("  {}: {}", TerminalState::Abandoned, snapshot.abandoned.to_string().dimmed());
    println!("  Peak concurrent executions: {}", snapshot.peak_in_flight);
    let t = &snapshot.recovery_time;
    if t.count > 0 {
        println!(
            "  Recovery time: mean {:.1}ms, stddev {:.1}ms, min {:.1}ms, max {:.1}ms",
            t.mean_ms, t.stddev_ms, t.min_ms, t.max_ms
        );
    }
    println!();

    println!("{}", "Strategies:".bold());
    for (strategy, stats) in &snapshot.strategies {
        println!(
            "  {:<22} attempts {:>5}  ok {:>5}  failed {:>5}  timed out {:>5}  ({:.0}%)",
            strategy.to_string(),
            stats.attempts,
            stats.successes,
            stats.failures,
            stats.timeouts,
            stats.success_rate() * 100.0
        );
    }
    println!();

    println!("{}", "Errors by category:".bold());
    for (category, count) in &snapshot.errors_by_category {
        println!("  {:<14} {}", category.to_string(), count);
    }
    println!();

    let system = warden.system_health();
    println!("{}", "Fleet health:".bold());
    println!(
        "  Worst: {}  mean score {:.2}  agents {}  open alerts {}",
        colour_status(system.worst_status),
        system.mean_score,
        system.agents,
        system.open_alerts
    );
    for (status, count) in &system.by_status {
        println!("  {:<10} {}", status.to_string(), count);
    }
}

fn colour_status(status: HealthStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        HealthStatus::Excellent | HealthStatus::Good => label.green(),
        HealthStatus::Warning => label.yellow(),
        _ => label.red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::domain::recovery::{RecoveryStrategy, ReportRecord};

    #[tokio::test]
    async fn test_simulated_executor_honours_failure_rate_extremes() {
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(7)));
        let report = ErrorReport::new(
            "a",
            AgentRole::Runtime,
            Severity::Error,
            ErrorCategory::Network,
            "x",
        );
        let mut record = ReportRecord::new(report.clone(), 3);
        let attempt = record
            .start_attempt(RecoveryStrategy::Retry, Duration::from_millis(50), false)
            .unwrap()
            .clone();

        let always = simulated_executor(rng.clone(), 1.0, Duration::ZERO);
        assert!(!always.execute(&report, &attempt).await.is_success());
        let never = simulated_executor(rng, 0.0, Duration::ZERO);
        assert!(never.execute(&report, &attempt).await.is_success());
    }

    #[test]
    fn test_synthetic_reports_are_valid_and_reproducible() {
        let agents = vec![
            (AgentId::new("runtime-0"), AgentRole::Runtime),
            (AgentId::new("versioning-1"), AgentRole::Versioning),
        ];
        let a = Mutex::new(StdRng::seed_from_u64(42));
        let b = Mutex::new(StdRng::seed_from_u64(42));
        for n in 0..50 {
            let left = synthetic_report(&agents, n, &a);
            let right = synthetic_report(&agents, n, &b);
            left.validate(512).unwrap();
            assert_eq!(left.agent_id, right.agent_id);
            assert_eq!(left.severity, right.severity);
            assert_eq!(left.category, right.category);
        }
    }

    #[test]
    fn test_health_feed_covers_every_agent() {
        let warden = Orchestrator::builder(WardenConfigManifest::default()).build().unwrap();
        let agents = vec![
            (AgentId::new("runtime-0"), AgentRole::Runtime),
            (AgentId::new("shader_pipeline-1"), AgentRole::ShaderPipeline),
        ];
        let rng = Mutex::new(StdRng::seed_from_u64(1));
        feed_health(&warden, &agents, 4, &rng).unwrap();
        assert_eq!(warden.system_health().agents, 2);
        let state = warden.get_agent_health(&agents[1].0).unwrap();
        assert_eq!(state.metrics[&Metric::CpuUsage].samples, 4);
    }
}
