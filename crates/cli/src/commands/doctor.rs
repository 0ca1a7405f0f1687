use kickoff_core::config::{AppConfig, CacheBackend, LoadOptions};
use kickoff_core::EndpointCatalog;
use kickoff_db::{connect_with_settings, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
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

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = vec![check_endpoint_catalog()];

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_upstream_credentials(&config));
            checks.push(check_cache_backend(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "upstream_credentials",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "cache_backend",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_endpoint_catalog() -> DoctorCheck {
    let catalog = EndpointCatalog::football();
    let problems = catalog.problems();
    if problems.is_empty() {
        DoctorCheck {
            name: "endpoint_catalog",
            status: CheckStatus::Pass,
            details: format!("{} endpoints registered", catalog.len()),
        }
    } else {
        DoctorCheck { name: "endpoint_catalog", status: CheckStatus::Fail, details: problems.join("; ") }
    }
}

fn check_upstream_credentials(config: &AppConfig) -> DoctorCheck {
    match config.require_api_key() {
        Ok(_) => DoctorCheck {
            name: "upstream_credentials",
            status: CheckStatus::Pass,
            details: format!("api key present for `{}`", config.upstream.base_url),
        },
        Err(error) => {
            DoctorCheck { name: "upstream_credentials", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_cache_backend(config: &AppConfig) -> DoctorCheck {
    if config.cache.backend == CacheBackend::Memory {
        return DoctorCheck {
            name: "cache_backend",
            status: CheckStatus::Pass,
            details: "in-process memory cache".to_string(),
        };
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "cache_backend",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(&config.cache.database_url, 1, 30)
            .await
            .map_err(|error| format!("failed to connect to cache database: {error}"))?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| format!("failed to inspect cache database migrations: {error}"))?;

        pool.close().await;
        Ok::<Vec<i64>, String>(pending)
    });

    match result {
        Ok(pending) if pending.is_empty() => DoctorCheck {
            name: "cache_backend",
            status: CheckStatus::Pass,
            details: format!("sqlite cache ready at `{}`", config.cache.database_url),
        },
        Ok(pending) => DoctorCheck {
            name: "cache_backend",
            status: CheckStatus::Fail,
            details: format!(
                "{} pending migration(s) at `{}`; run `kickoff migrate`",
                pending.len(),
                config.cache.database_url
            ),
        },
        Err(error) => DoctorCheck { name: "cache_backend", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
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
