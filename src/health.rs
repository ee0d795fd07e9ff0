//! Health check system for fleetwatch
//!
//! Checks that the background loops are alive, that the store answers, and
//! summarizes agent liveness and task outcomes.

use crate::control_plane::ControlPlane;
use crate::registry::RegistryStats;
use crate::tasks::TaskStats;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Store checks slower than this are reported as a warning
const SLOW_STORE_THRESHOLD: Duration = Duration::from_millis(500);

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Individual health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Overall health check summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: CheckStatus,
    pub checks: Vec<CheckResult>,
    pub summary: HealthStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStats {
    pub total_checks: usize,
    pub passed: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl HealthSummary {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let count = |status: CheckStatus| checks.iter().filter(|c| c.status == status).count();
        let passed = count(CheckStatus::Pass);
        let warnings = count(CheckStatus::Warn);
        let errors = count(CheckStatus::Fail);

        let status = if errors > 0 {
            CheckStatus::Fail
        } else if warnings > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        };

        Self {
            status,
            summary: HealthStats {
                total_checks: checks.len(),
                passed,
                warnings,
                errors,
            },
            checks,
        }
    }
}

/// Run all health checks
pub async fn run_health_checks(plane: &ControlPlane) -> HealthSummary {
    info!("Running fleetwatch health checks");

    let checks = vec![
        check_background_loops(plane).await,
        check_store(plane).await,
        check_agents(plane.registry().stats().await),
        check_tasks(plane.tasks().stats().await),
        check_handlers(plane.dispatcher().handler_types().await),
    ];

    HealthSummary::from_checks(checks)
}

async fn check_background_loops(plane: &ControlPlane) -> CheckResult {
    debug!("Checking background loops...");
    let sweep = plane.registry().is_sweep_running().await;
    let cleanup = plane.is_cleanup_running().await;
    let details = serde_json::json!({ "liveness_sweep": sweep, "task_cleanup": cleanup });

    match (sweep, cleanup) {
        (true, true) => {
            CheckResult::pass("background_loops", "Liveness sweep and task cleanup running")
        }
        (false, _) => CheckResult::fail("background_loops", "Liveness sweep is not running")
            .with_details(details),
        (true, false) => CheckResult::warn("background_loops", "Task cleanup is not running")
            .with_details(details),
    }
}

async fn check_store(plane: &ControlPlane) -> CheckResult {
    debug!("Checking supervision store...");
    let start = Instant::now();
    let outcome = plane.store().count_events("", None).await;
    let elapsed = start.elapsed();

    match outcome {
        Err(e) => CheckResult::fail("store", "Supervision store is not responding")
            .with_details(serde_json::json!({ "error": e.to_string() })),
        Ok(_) if elapsed > SLOW_STORE_THRESHOLD => CheckResult::warn(
            "store",
            format!("Supervision store is slow ({}ms)", elapsed.as_millis()),
        ),
        Ok(_) => CheckResult::pass(
            "store",
            format!("Supervision store responded in {}ms", elapsed.as_millis()),
        ),
    }
}

fn check_agents(stats: RegistryStats) -> CheckResult {
    let details = serde_json::to_value(&stats).unwrap_or_default();
    if stats.total == 0 {
        CheckResult::warn("agents", "No agents registered").with_details(details)
    } else if stats.offline > 0 {
        CheckResult::warn(
            "agents",
            format!("{} of {} agent(s) offline", stats.offline, stats.total),
        )
        .with_details(details)
    } else {
        CheckResult::pass("agents", format!("{} agent(s) online", stats.connected))
            .with_details(details)
    }
}

fn check_tasks(stats: TaskStats) -> CheckResult {
    let unsuccessful = stats.failed + stats.timeout;
    let details = serde_json::to_value(&stats).unwrap_or_default();
    if unsuccessful > 0 {
        CheckResult::warn(
            "tasks",
            format!("{} task(s) failed or timed out", unsuccessful),
        )
        .with_details(details)
    } else {
        CheckResult::pass(
            "tasks",
            format!("{} task(s) tracked, none failing", stats.total),
        )
        .with_details(details)
    }
}

fn check_handlers(types: Vec<String>) -> CheckResult {
    if types.is_empty() {
        CheckResult::warn("command_handlers", "No command handlers registered")
    } else {
        CheckResult::pass(
            "command_handlers",
            format!("{} command handler(s) registered", types.len()),
        )
        .with_details(serde_json::json!({ "types": types }))
    }
}

/// Print health summary to console
pub fn print_health_summary(summary: &HealthSummary, verbose: bool) {
    println!("Fleetwatch Health Check");
    println!("-----------------------");
    println!();

    for check in &summary.checks {
        let status_text = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };

        println!("{} - {}", check.name, status_text);

        if verbose || check.status != CheckStatus::Pass {
            println!("   {}", check.message);
            if let (true, Some(details)) = (verbose, &check.details) {
                println!("   Details: {}", details);
            }
        }
    }

    println!();
    println!(
        "Overall: {} ({} passed, {} warnings, {} errors)",
        match summary.status {
            CheckStatus::Pass => "HEALTHY",
            CheckStatus::Warn => "WARNINGS",
            CheckStatus::Fail => "ERRORS",
        },
        summary.summary.passed,
        summary.summary.warnings,
        summary.summary.errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::registry::{HeartbeatRequest, RegisterRequest};

    async fn plane() -> ControlPlane {
        let mut config = FleetConfig::default();
        config.storage.in_memory = true;
        ControlPlane::standalone(config).await.unwrap()
    }

    #[test]
    fn test_summary_status() {
        let summary = HealthSummary::from_checks(vec![
            CheckResult::pass("a", "ok"),
            CheckResult::warn("b", "meh"),
        ]);
        assert_eq!(summary.status, CheckStatus::Warn);
        assert_eq!(summary.summary.total_checks, 2);

        let summary = HealthSummary::from_checks(vec![
            CheckResult::warn("b", "meh"),
            CheckResult::fail("c", "bad"),
        ]);
        assert_eq!(summary.status, CheckStatus::Fail);
        assert_eq!(summary.summary.errors, 1);
    }

    #[tokio::test]
    async fn test_stopped_plane_fails() {
        let plane = plane().await;
        let summary = plane.health().await;
        assert_eq!(summary.status, CheckStatus::Fail);
        let loops = summary
            .checks
            .iter()
            .find(|c| c.name == "background_loops")
            .unwrap();
        assert_eq!(loops.status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn test_running_plane_with_agent() {
        let plane = plane().await;
        plane.start().await;
        plane
            .registry()
            .register(RegisterRequest {
                agent_id: "a1".to_string(),
                ip_address: "10.0.0.1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        plane
            .registry()
            .handle_heartbeat(HeartbeatRequest {
                agent_id: "a1".to_string(),
                usage: Default::default(),
            })
            .await
            .unwrap();

        let summary = plane.health().await;
        let status_of = |name: &str| {
            summary
                .checks
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.status)
        };
        assert_eq!(status_of("background_loops"), Some(CheckStatus::Pass));
        assert_eq!(status_of("store"), Some(CheckStatus::Pass));
        assert_eq!(status_of("agents"), Some(CheckStatus::Pass));
        assert_eq!(status_of("command_handlers"), Some(CheckStatus::Warn));

        plane.shutdown().await;
    }
}
