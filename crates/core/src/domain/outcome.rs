use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::domain::call::CallId;
use crate::domain::plan::PlanOptimization;
use crate::errors::CallError;

/// Settled result of one call. Failures are carried here, never raised.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallOutcome {
    pub call_id: CallId,
    pub endpoint: String,
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<CallError>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    /// Network attempts made for this call; zero for cache hits and skips.
    pub attempts: u32,
    /// Set when a dependency never produced data, so no attempt was made.
    pub skipped: bool,
    pub optional: bool,
}

impl CallOutcome {
    pub fn succeeded(
        call_id: CallId,
        endpoint: impl Into<String>,
        payload: Value,
        attempts: u32,
        cache_hit: bool,
    ) -> Self {
        Self {
            call_id,
            endpoint: endpoint.into(),
            success: true,
            payload: Some(payload),
            error: None,
            latency_ms: 0,
            cache_hit,
            attempts,
            skipped: false,
            optional: false,
        }
    }

    pub fn failed(call_id: CallId, endpoint: impl Into<String>, error: CallError, attempts: u32) -> Self {
        let skipped = matches!(error, CallError::DependencyUnavailable { .. });
        Self {
            call_id,
            endpoint: endpoint.into(),
            success: false,
            payload: None,
            error: Some(error),
            latency_ms: 0,
            cache_hit: false,
            attempts,
            skipped,
            optional: false,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|error| format!("{}: {error}", self.call_id))
    }
}

/// Payloads gathered so far, addressable by call id and by endpoint name.
///
/// Entries are only ever added. When several calls hit the same endpoint the
/// endpoint slot keeps the first one in plan order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CollectedData {
    pub by_call: BTreeMap<CallId, Value>,
    pub by_endpoint: BTreeMap<String, Value>,
}

impl CollectedData {
    pub fn insert(&mut self, call_id: CallId, endpoint: &str, payload: Value) {
        self.by_endpoint.entry(endpoint.to_owned()).or_insert_with(|| payload.clone());
        self.by_call.entry(call_id).or_insert(payload);
    }

    pub fn call(&self, call_id: &CallId) -> Option<&Value> {
        self.by_call.get(call_id)
    }

    pub fn endpoint(&self, endpoint: &str) -> Option<&Value> {
        self.by_endpoint.get(endpoint)
    }

    pub fn contains_call(&self, call_id: &CallId) -> bool {
        self.by_call.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.by_call.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_call.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub correlation_id: String,
    pub outcomes: Vec<CallOutcome>,
    pub network_calls: u32,
    pub cache_hits: u32,
    pub errors: Vec<String>,
    /// Failures of non-essential calls; they do not affect `success`.
    pub warnings: Vec<String>,
    pub data: CollectedData,
    pub optimizations: Vec<PlanOptimization>,
    pub success: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn outcome(&self, call_id: &CallId) -> Option<&CallOutcome> {
        self.outcomes.iter().find(|outcome| &outcome.call_id == call_id)
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.success).count()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::call::CallId;
    use crate::errors::CallError;

    use super::{CallOutcome, CollectedData};

    #[test]
    fn collected_data_keeps_first_payload_per_endpoint() {
        let mut data = CollectedData::default();
        data.insert(CallId::new("arsenal"), "team_search", json!({"team": {"id": 42}}));
        data.insert(CallId::new("chelsea"), "team_search", json!({"team": {"id": 49}}));

        assert_eq!(data.len(), 2);
        assert_eq!(data.endpoint("team_search"), Some(&json!({"team": {"id": 42}})));
        assert_eq!(data.call(&CallId::new("chelsea")), Some(&json!({"team": {"id": 49}})));
    }

    #[test]
    fn dependency_failures_are_marked_skipped() {
        let outcome = CallOutcome::failed(
            CallId::new("h2h"),
            "head_to_head",
            CallError::DependencyUnavailable {
                endpoint: "head_to_head".to_owned(),
                dependency: "chelsea".to_owned(),
            },
            0,
        );

        assert!(outcome.skipped);
        assert!(!outcome.success);
        assert!(outcome.error_message().is_some_and(|message| message.starts_with("h2h: ")));
    }
}
