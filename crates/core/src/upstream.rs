use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::UpstreamError;

/// The data provider. Every call is an idempotent read.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, UpstreamError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct Rule {
    endpoint: String,
    matching: BTreeMap<String, Value>,
    queued: VecDeque<Result<Value, UpstreamError>>,
    repeat: Option<Result<Value, UpstreamError>>,
}

impl Rule {
    fn matches(&self, endpoint: &str, params: &BTreeMap<String, Value>) -> bool {
        self.endpoint == endpoint
            && self.matching.iter().all(|(key, expected)| params.get(key) == Some(expected))
    }

    fn next(&mut self) -> Option<Result<Value, UpstreamError>> {
        self.queued.pop_front().or_else(|| self.repeat.clone())
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    rules: Vec<Rule>,
    requests: Vec<RecordedRequest>,
}

/// In-process upstream that answers from a script and records every request.
///
/// Rules are consulted in the order they were added; the first rule that
/// matches the endpoint and parameters and still has an answer wins. Queued
/// answers are consumed one per request, repeating answers never run out.
#[derive(Debug, Default)]
pub struct ScriptedUpstream {
    state: Mutex<ScriptState>,
    latency: Option<Duration>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn respond(self, endpoint: &str, payload: Value) -> Self {
        self.rule(endpoint, &[], VecDeque::new(), Some(Ok(payload)))
    }

    pub fn respond_when(self, endpoint: &str, matching: &[(&str, Value)], payload: Value) -> Self {
        self.rule(endpoint, matching, VecDeque::new(), Some(Ok(payload)))
    }

    pub fn fail(self, endpoint: &str, error: UpstreamError) -> Self {
        self.rule(endpoint, &[], VecDeque::new(), Some(Err(error)))
    }

    pub fn fail_when(self, endpoint: &str, matching: &[(&str, Value)], error: UpstreamError) -> Self {
        self.rule(endpoint, matching, VecDeque::new(), Some(Err(error)))
    }

    /// Answers consumed in order; afterwards later rules apply.
    pub fn sequence(self, endpoint: &str, answers: Vec<Result<Value, UpstreamError>>) -> Self {
        self.rule(endpoint, &[], answers.into(), None)
    }

    fn rule(
        self,
        endpoint: &str,
        matching: &[(&str, Value)],
        queued: VecDeque<Result<Value, UpstreamError>>,
        repeat: Option<Result<Value, UpstreamError>>,
    ) -> Self {
        self.state.lock().rules.push(Rule {
            endpoint: endpoint.to_owned(),
            matching: matching.iter().map(|(key, value)| ((*key).to_owned(), value.clone())).collect(),
            queued,
            repeat,
        });
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests_to(&self, endpoint: &str) -> usize {
        self.state.lock().requests.iter().filter(|request| request.endpoint == endpoint).count()
    }

    fn answer(&self, endpoint: &str, params: &BTreeMap<String, Value>) -> Result<Value, UpstreamError> {
        let mut state = self.state.lock();
        state.requests.push(RecordedRequest { endpoint: endpoint.to_owned(), params: params.clone() });

        state
            .rules
            .iter_mut()
            .filter(|rule| rule.matches(endpoint, params))
            .find_map(Rule::next)
            .unwrap_or_else(|| Err(UpstreamError::NotFound(format!("no scripted answer for `{endpoint}`"))))
    }
}

#[async_trait::async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, UpstreamError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(endpoint, params)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use crate::errors::UpstreamError;

    use super::{ScriptedUpstream, UpstreamClient};

    #[tokio::test]
    async fn specific_rules_take_precedence_when_added_first() {
        let upstream = ScriptedUpstream::new()
            .fail_when("team_search", &[("name", json!("Chelsea"))], UpstreamError::Transport("reset".to_owned()))
            .respond("team_search", json!({"team": {"id": 42}}));

        let chelsea = BTreeMap::from([("name".to_owned(), json!("Chelsea"))]);
        let arsenal = BTreeMap::from([("name".to_owned(), json!("Arsenal"))]);

        assert!(upstream.fetch("team_search", &chelsea).await.is_err());
        assert_eq!(upstream.fetch("team_search", &arsenal).await, Ok(json!({"team": {"id": 42}})));
        assert_eq!(upstream.requests_to("team_search"), 2);
    }

    #[tokio::test]
    async fn sequences_are_consumed_before_repeating_rules() {
        let upstream = ScriptedUpstream::new()
            .sequence("standings", vec![Err(UpstreamError::RateLimited("slow down".to_owned()))])
            .respond("standings", json!([]));

        let params = BTreeMap::new();
        assert!(upstream.fetch("standings", &params).await.is_err());
        assert_eq!(upstream.fetch("standings", &params).await, Ok(json!([])));
        assert_eq!(upstream.request_count(), 2);
    }

    #[tokio::test]
    async fn unscripted_endpoints_are_not_found() {
        let upstream = ScriptedUpstream::new();
        let error = upstream.fetch("venues", &BTreeMap::new()).await.expect_err("nothing scripted");
        assert_eq!(error.kind(), "not_found");
    }
}
