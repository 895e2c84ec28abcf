use leadline_core::config::{AppConfig, DeliveryMode, LoadOptions};
use leadline_db::migrations;
use serde::Serialize;

use crate::commands::{block_on, open_pool, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when nothing failed; warnings do not fail the run.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\
                 \"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_integrations(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["integration_credentials", "database"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if warned {
        (CheckStatus::Warn, "doctor: ready with warnings")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

/// Missing credentials are expected in `log` mode; in `live` mode the
/// affected channel dead-letters every send.
fn check_integrations(config: &AppConfig) -> DoctorCheck {
    let missing: Vec<&str> = config
        .integrations()
        .into_iter()
        .filter(|status| !status.configured)
        .map(|status| status.name)
        .collect();

    let status = match (missing.is_empty(), config.delivery.mode) {
        (true, _) => CheckStatus::Pass,
        (false, DeliveryMode::Log) => CheckStatus::Pass,
        (false, DeliveryMode::Live) => CheckStatus::Warn,
    };
    let details = if missing.is_empty() {
        format!("all integrations configured (delivery mode `{}`)", config.delivery.mode.as_str())
    } else {
        format!(
            "missing credentials for {} (delivery mode `{}`)",
            missing.join(", "),
            config.delivery.mode.as_str()
        )
    };

    DoctorCheck { name: "integration_credentials", status, details }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let result = block_on(async {
        let pool = open_pool(config).await?;
        let versions = migrations::applied_versions(&pool)
            .await
            .map_err(|error| format!("failed to read migration state: {error}"))?;
        pool.close().await;
        Ok::<Vec<i64>, String>(versions)
    });

    match result {
        Ok(Ok(versions)) if versions.is_empty() => DoctorCheck {
            name: "database",
            status: CheckStatus::Warn,
            details: format!(
                "connected using `{}`; no migrations applied, run `leadline migrate`",
                config.database.url
            ),
        },
        Ok(Ok(versions)) => DoctorCheck {
            name: "database",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}`; schema versions {versions:?}",
                config.database.url
            ),
        },
        Ok(Err(error)) | Err(error) => {
            DoctorCheck { name: "database", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
