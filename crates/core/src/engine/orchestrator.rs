use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::store::DEFAULT_MEMORY_MAX_ENTRIES;
use crate::cache::{CacheStore, Canonicalizer, MemoryCacheStore, ResponseCache, TtlPolicy};
use crate::catalog::EndpointCatalog;
use crate::clock::{system_clock, Clock};
use crate::config::AppConfig;
use crate::domain::call::{CallId, CallSpec};
use crate::domain::outcome::{CallOutcome, CollectedData, ExecutionResult};
use crate::domain::plan::{ExecutionPlan, Requirement};
use crate::engine::breaker::{BreakerRegistry, BreakerScope, BreakerSettings, CircuitState};
use crate::engine::executor::{CallExecutor, RetryPolicy};
use crate::engine::planner::DependencyPlanner;
use crate::errors::{CacheError, CallError, PlanContractError};
use crate::upstream::UpstreamClient;

const DEFAULT_KEY_PREFIX: &str = "kickoff:v1";

/// Drives a plan level by level. Breakers and cache are process-wide and
/// shared by every batch this orchestrator runs.
pub struct Orchestrator {
    planner: DependencyPlanner,
    executor: CallExecutor,
    cache: Arc<ResponseCache>,
    breakers: Arc<BreakerRegistry>,
    batch_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn builder(upstream: Arc<dyn UpstreamClient>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(upstream)
    }

    pub fn plan(&self, requirements: &[Requirement], static_params: &BTreeMap<String, Value>) -> ExecutionPlan {
        self.planner.plan(requirements, static_params)
    }

    pub fn plan_calls(&self, calls: Vec<CallSpec>) -> Result<ExecutionPlan, PlanContractError> {
        self.planner.plan_calls(calls)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Plans and executes in one step, under the configured batch deadline.
    pub async fn run(
        &self,
        requirements: &[Requirement],
        static_params: &BTreeMap<String, Value>,
    ) -> ExecutionResult {
        let plan = self.plan(requirements, static_params);
        match self.batch_timeout {
            Some(deadline) => self.execute_with_deadline(&plan, deadline).await,
            None => self.execute(&plan).await,
        }
    }

    pub async fn execute(&self, plan: &ExecutionPlan) -> ExecutionResult {
        let correlation_id = Uuid::new_v4().to_string();
        self.execute_correlated(plan, correlation_id).await
    }

    /// Runs the batch under an external timeout. On expiry in-flight calls
    /// are dropped and the result carries only the deadline error.
    pub async fn execute_with_deadline(&self, plan: &ExecutionPlan, deadline: Duration) -> ExecutionResult {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        match tokio::time::timeout(deadline, self.execute_correlated(plan, correlation_id.clone())).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    event_name = "engine.batch.deadline_exceeded",
                    correlation_id = %correlation_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "batch exceeded its deadline"
                );
                ExecutionResult {
                    correlation_id,
                    errors: vec![format!("batch exceeded deadline of {}ms", deadline.as_millis())],
                    optimizations: plan.optimizations.clone(),
                    success: false,
                    duration_ms: elapsed_ms(started),
                    ..ExecutionResult::default()
                }
            }
        }
    }

    async fn execute_correlated(&self, plan: &ExecutionPlan, correlation_id: String) -> ExecutionResult {
        let started = Instant::now();
        info!(
            event_name = "engine.batch.started",
            correlation_id = %correlation_id,
            levels = plan.levels.len(),
            calls = plan.call_count(),
            optimizations = plan.optimizations.len(),
            "executing plan"
        );

        let mut data = CollectedData::default();
        let mut outcomes = Vec::with_capacity(plan.call_count());
        let mut errors = plan.planning_errors.iter().map(ToString::to_string).collect::<Vec<_>>();
        let mut warnings = Vec::new();
        let mut reported = ReportedFailures::default();

        for (index, level) in plan.levels.iter().enumerate() {
            let settled = {
                let launched =
                    level.iter().map(|call| self.executor.execute(call, &data, &correlation_id));
                join_all(launched).await
            };

            for (call, outcome) in level.iter().zip(settled) {
                match &outcome.payload {
                    Some(payload) => publish(&mut data, plan, call, payload),
                    None => {
                        if let Some(message) = reported.failure_message(&outcome, call.optional) {
                            if call.optional {
                                warnings.push(message);
                            } else {
                                errors.push(message);
                            }
                        }
                    }
                }
                outcomes.push(outcome);
            }

            debug!(
                event_name = "engine.level.settled",
                correlation_id = %correlation_id,
                level = index,
                calls = level.len(),
                "level settled"
            );
        }

        let network_calls = outcomes.iter().map(|outcome| outcome.attempts).sum();
        let cache_hits = outcomes.iter().filter(|outcome| outcome.cache_hit).count() as u32;
        let succeeded = outcomes.iter().filter(|outcome| outcome.success).count();
        let success = errors.is_empty() && (outcomes.is_empty() || succeeded > 0);

        let result = ExecutionResult {
            correlation_id,
            outcomes,
            network_calls,
            cache_hits,
            errors,
            warnings,
            data,
            optimizations: plan.optimizations.clone(),
            success,
            duration_ms: elapsed_ms(started),
        };

        info!(
            event_name = "engine.batch.completed",
            correlation_id = %result.correlation_id,
            success = result.success,
            network_calls = result.network_calls,
            cache_hits = result.cache_hits,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            duration_ms = result.duration_ms,
            "batch completed"
        );
        result
    }

    pub fn reset_breakers(&self) {
        self.breakers.reset_all();
    }

    pub fn breaker_states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers.snapshots()
    }

    pub async fn flush_cache(&self) -> Result<(), CacheError> {
        self.cache.flush().await?;
        info!(event_name = "cache.flushed", "cache flushed");
        Ok(())
    }

    pub async fn invalidate_cache(&self, prefix: &str) -> Result<u64, CacheError> {
        let removed = self.cache.invalidate_prefix(prefix).await?;
        info!(event_name = "cache.invalidated", prefix = %prefix, removed, "cache prefix invalidated");
        Ok(removed)
    }
}

/// Makes a payload visible to later levels, including under the ids and
/// endpoints of calls it stands in for.
fn publish(data: &mut CollectedData, plan: &ExecutionPlan, call: &CallSpec, payload: &Value) {
    data.insert(call.call_id.clone(), &call.endpoint, payload.clone());
    for optimization in plan.optimizations.iter().filter(|optimization| optimization.substitute == call.call_id) {
        for replaced in &optimization.replaced {
            data.insert(replaced.call_id.clone(), &replaced.endpoint, payload.clone());
        }
    }
}

/// Failed calls by the severity their root cause was reported at.
#[derive(Default)]
struct ReportedFailures {
    as_error: HashSet<CallId>,
    as_warning: HashSet<CallId>,
}

impl ReportedFailures {
    /// Text for a failed outcome, or `None` when its root cause is already on
    /// record at this call's severity or higher. An essential call skipped
    /// behind a failed optional dependency is still reported as an error.
    fn failure_message(&mut self, outcome: &CallOutcome, optional: bool) -> Option<String> {
        if let Some(CallError::DependencyUnavailable { dependency, .. }) = &outcome.error {
            let dependency = CallId::new(dependency.as_str());
            if self.as_error.contains(&dependency) {
                self.as_error.insert(outcome.call_id.clone());
                return None;
            }
            if optional && self.as_warning.contains(&dependency) {
                self.as_warning.insert(outcome.call_id.clone());
                return None;
            }
        }

        if optional {
            self.as_warning.insert(outcome.call_id.clone());
        } else {
            self.as_error.insert(outcome.call_id.clone());
        }
        outcome.error_message()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

/// Assembles the process-wide engine: catalog, cache, breakers, retry policy.
pub struct OrchestratorBuilder {
    upstream: Arc<dyn UpstreamClient>,
    catalog: EndpointCatalog,
    store: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    breaker_scope: BreakerScope,
    breaker_settings: BreakerSettings,
    ttl_policy: TtlPolicy,
    key_prefix: String,
    aliases: Vec<(String, String)>,
    batch_timeout: Option<Duration>,
    memory_max_entries: usize,
}

impl OrchestratorBuilder {
    pub fn new(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            upstream,
            catalog: EndpointCatalog::football(),
            store: None,
            clock: system_clock(),
            retry: RetryPolicy::default(),
            breaker_scope: BreakerScope::default(),
            breaker_settings: BreakerSettings::default(),
            ttl_policy: TtlPolicy::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            aliases: Vec::new(),
            batch_timeout: None,
            memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
        }
    }

    /// Engine settings from loaded configuration. The cache store is chosen
    /// by the caller since the persistent backend lives in another crate.
    pub fn from_config(config: &AppConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self::new(upstream)
            .retry_policy(config.retry_policy())
            .breaker(config.breaker.scope, config.breaker_settings())
            .ttl_policy(config.ttl_policy())
            .key_prefix(config.cache.key_prefix.clone())
            .batch_timeout(config.batch_timeout())
            .memory_max_entries(config.cache.memory_max_entries)
    }

    pub fn catalog(mut self, catalog: EndpointCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(mut self, scope: BreakerScope, settings: BreakerSettings) -> Self {
        self.breaker_scope = scope;
        self.breaker_settings = settings;
        self
    }

    pub fn ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases.push((alias.to_owned(), canonical.to_owned()));
        self
    }

    pub fn batch_timeout(mut self, deadline: Option<Duration>) -> Self {
        self.batch_timeout = deadline;
        self
    }

    /// Bound for the default in-process store. Ignored when a store is supplied.
    pub fn memory_max_entries(mut self, max_entries: usize) -> Self {
        self.memory_max_entries = max_entries;
        self
    }

    pub fn build(self) -> Orchestrator {
        let catalog = Arc::new(self.catalog);
        let canonicalizer = self
            .aliases
            .iter()
            .fold(Canonicalizer::new(self.key_prefix, catalog.clone()), |canonicalizer, (alias, canonical)| {
                canonicalizer.with_alias(alias, canonical)
            });

        let store = self
            .store
            .unwrap_or_else(|| {
                Arc::new(MemoryCacheStore::new(self.clock.clone()).with_max_entries(self.memory_max_entries))
            });
        let cache = Arc::new(ResponseCache::new(
            store,
            canonicalizer.clone(),
            self.ttl_policy,
            catalog.clone(),
            self.clock.clone(),
        ));
        let breakers = Arc::new(BreakerRegistry::new(self.breaker_scope, self.breaker_settings, self.clock));
        let executor = CallExecutor::new(self.upstream, cache.clone(), breakers.clone(), self.retry);

        Orchestrator {
            planner: DependencyPlanner::new(catalog, canonicalizer),
            executor,
            cache,
            breakers,
            batch_timeout: self.batch_timeout,
        }
    }
}
