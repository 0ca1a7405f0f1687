use std::sync::Arc;

use kickoff_core::{Canonicalizer, DependencyPlanner, EndpointCatalog, ExecutionPlan};
use serde::Serialize;

use crate::commands::query::QueryArgs;
use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct PlanReport<'a> {
    command: &'static str,
    status: &'static str,
    call_count: usize,
    unknown_endpoints: Vec<String>,
    planning_errors: Vec<String>,
    plan: &'a ExecutionPlan,
}

/// Prints the leveled plan without touching the network.
pub fn run(args: QueryArgs) -> CommandResult {
    let config = match load_config("plan") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let (requirements, static_params) = match args.into_request() {
        Ok(request) => request,
        Err(message) => return CommandResult::failure("plan", "invalid_arguments", message, 2),
    };

    let catalog = Arc::new(EndpointCatalog::football());
    let canonicalizer = Canonicalizer::new(config.cache.key_prefix.clone(), catalog.clone());
    let planner = DependencyPlanner::new(catalog.clone(), canonicalizer);
    let plan = planner.plan(&requirements, &static_params);

    let unknown_endpoints = requirements
        .iter()
        .filter(|requirement| !catalog.contains(&requirement.endpoint))
        .map(|requirement| requirement.endpoint.clone())
        .collect::<Vec<_>>();
    let planning_errors = plan.planning_errors.iter().map(ToString::to_string).collect::<Vec<_>>();
    let complete = planning_errors.is_empty() && unknown_endpoints.is_empty();

    let report = PlanReport {
        command: "plan",
        status: if complete { "ok" } else { "incomplete" },
        call_count: plan.call_count(),
        unknown_endpoints,
        planning_errors,
        plan: &plan,
    };
    CommandResult::report("plan", if complete { 0 } else { 1 }, &report)
}
