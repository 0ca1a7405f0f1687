//! Kickoff core: planning and execution of dependent upstream calls.
//!
//! One logical query becomes many read-only calls against a slow, rate-limited
//! data provider. This crate plans those calls into dependency levels, runs each
//! level concurrently, shares results across callers through a canonicalized
//! cache, and protects the upstream with retries and a circuit breaker.
//!
//! # Layout
//!
//! - `domain` - call specs, plans, outcomes
//! - `catalog` - static endpoint classification table
//! - `cache` - canonical keys, TTL policy, cache stores
//! - `engine` - planner, breaker, executor, orchestrator
//! - `upstream` - the provider seam and a scripted fake
//!
//! Failures are values: a batch always returns an `ExecutionResult`, even when
//! every call in it failed.

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod upstream;

pub use cache::{CacheStore, Canonicalizer, MemoryCacheStore, ResponseCache, TtlClass, TtlPolicy};
pub use catalog::{CacheStrategy, EndpointCatalog, EndpointDefinition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use domain::call::{CallId, CallSpec, ParamMap, ParamValue};
pub use domain::outcome::{CallOutcome, CollectedData, ExecutionResult};
pub use domain::plan::{ExecutionPlan, PlanOptimization, PlanningError, Requirement};
pub use engine::breaker::{
    Admission, BreakerPermit, BreakerRegistry, BreakerScope, BreakerSettings, CircuitBreaker,
    CircuitMode, CircuitState,
};
pub use engine::executor::{Backoff, CallExecutor, RetryPolicy};
pub use engine::orchestrator::{Orchestrator, OrchestratorBuilder};
pub use engine::planner::DependencyPlanner;
pub use errors::{CacheError, CallError, PlanContractError, UpstreamError};
pub use upstream::{ScriptedUpstream, UpstreamClient};
