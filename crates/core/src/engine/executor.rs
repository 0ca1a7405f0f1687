use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::domain::call::CallSpec;
use crate::domain::outcome::{CallOutcome, CollectedData};
use crate::engine::breaker::BreakerRegistry;
use crate::engine::resolve::{resolve_params, ParamResolution};
use crate::errors::CallError;
use crate::upstream::UpstreamClient;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `delay * attempt`
    #[default]
    Linear,
    /// `delay * 2^(attempt - 1)`
    Exponential,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, delay: Duration::from_millis(500), backoff: Backoff::Linear }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => {
                self.delay.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            }
        }
    }

    fn budget(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Runs one call: breaker gate, placeholder resolution, cache, then
/// breaker-gated attempts with backoff. Never returns an error; every failure
/// ends up in the outcome.
pub struct CallExecutor {
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<ResponseCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
}

impl CallExecutor {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        cache: Arc<ResponseCache>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self { upstream, cache, breakers, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn execute(&self, call: &CallSpec, data: &CollectedData, correlation_id: &str) -> CallOutcome {
        let started = Instant::now();
        self.run(call, data, correlation_id)
            .await
            .with_optional(call.optional)
            .with_latency_ms(started.elapsed().as_millis().try_into().unwrap_or(u64::MAX))
    }

    async fn run(&self, call: &CallSpec, data: &CollectedData, correlation_id: &str) -> CallOutcome {
        let endpoint = call.endpoint.as_str();
        let breaker = self.breakers.for_endpoint(endpoint);

        if !breaker.admits() {
            debug!(
                event_name = "engine.call.circuit_open",
                correlation_id = %correlation_id,
                call_id = %call.call_id,
                endpoint = %endpoint,
                "breaker open; failing fast"
            );
            return CallOutcome::failed(
                call.call_id.clone(),
                endpoint,
                CallError::CircuitOpen { endpoint: endpoint.to_owned(), last_failure: None },
                0,
            );
        }

        let params = match resolve_params(call, data) {
            ParamResolution::DependencyUnavailable(dependency) => {
                debug!(
                    event_name = "engine.call.skipped",
                    correlation_id = %correlation_id,
                    call_id = %call.call_id,
                    dependency = %dependency,
                    "dependency produced no data; skipping"
                );
                return CallOutcome::failed(
                    call.call_id.clone(),
                    endpoint,
                    CallError::DependencyUnavailable {
                        endpoint: endpoint.to_owned(),
                        dependency: dependency.to_string(),
                    },
                    0,
                );
            }
            ParamResolution::Ready { params, unresolved } => {
                if !unresolved.is_empty() {
                    warn!(
                        event_name = "engine.call.placeholder_unresolved",
                        correlation_id = %correlation_id,
                        call_id = %call.call_id,
                        params = ?unresolved,
                        "placeholder could not be resolved; sending it literally"
                    );
                }
                params
            }
        };

        let key = self.cache.key_for(endpoint, &params);
        if let Some(entry) = self.cache.lookup(&key, correlation_id).await {
            debug!(
                event_name = "engine.call.cache_hit",
                correlation_id = %correlation_id,
                call_id = %call.call_id,
                key = %key,
                "served from cache"
            );
            return CallOutcome::succeeded(call.call_id.clone(), endpoint, entry.payload, 0, true);
        }

        let budget = self.retry.budget();
        let mut attempt = 0;
        let mut last_failure = None;
        loop {
            let Some(permit) = breaker.try_acquire() else {
                return CallOutcome::failed(
                    call.call_id.clone(),
                    endpoint,
                    CallError::CircuitOpen { endpoint: endpoint.to_owned(), last_failure },
                    attempt,
                );
            };
            attempt += 1;

            // The permit lives across the await; a cancelled batch drops it.
            match self.upstream.fetch(endpoint, &params).await {
                Ok(payload) => {
                    permit.succeed();
                    self.cache.store(&key, endpoint, &payload, correlation_id).await;
                    return CallOutcome::succeeded(call.call_id.clone(), endpoint, payload, attempt, false);
                }
                Err(error) if !error.is_transient() => {
                    permit.release();
                    debug!(
                        event_name = "engine.call.rejected",
                        correlation_id = %correlation_id,
                        call_id = %call.call_id,
                        error_kind = error.kind(),
                        "upstream rejected call; not retrying"
                    );
                    return CallOutcome::failed(
                        call.call_id.clone(),
                        endpoint,
                        CallError::Rejected { endpoint: endpoint.to_owned(), source: error },
                        attempt,
                    );
                }
                Err(error) => {
                    permit.fail();
                    warn!(
                        event_name = "engine.call.attempt_failed",
                        correlation_id = %correlation_id,
                        call_id = %call.call_id,
                        attempt,
                        budget,
                        error = %error,
                        "upstream attempt failed"
                    );

                    if attempt >= budget {
                        return CallOutcome::failed(
                            call.call_id.clone(),
                            endpoint,
                            CallError::Exhausted { endpoint: endpoint.to_owned(), attempts: attempt, source: error },
                            attempt,
                        );
                    }
                    last_failure = Some(error);
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
            }
        }
    }
}
