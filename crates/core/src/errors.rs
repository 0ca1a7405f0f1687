use serde::Serialize;
use thiserror::Error;

/// Typed failure reported by the upstream data provider.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum UpstreamError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("upstream resource not found: {0}")]
    NotFound(String),
    #[error("upstream rejected request: {0}")]
    BadRequest(String),
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("upstream payload could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Transient failures are retried and count against breaker health.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transport(_) | Self::Decode(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
        }
    }
}

/// Terminal failure of a single call. Carried inside `CallOutcome`, never raised.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallError {
    #[error(
        "circuit open for `{endpoint}`: upstream calls suspended{}",
        .last_failure.as_ref().map(|error| format!(" (last failure: {error})")).unwrap_or_default()
    )]
    CircuitOpen {
        endpoint: String,
        /// Failure of the previous attempt when the breaker opened mid-retry.
        #[serde(skip_serializing_if = "Option::is_none")]
        last_failure: Option<UpstreamError>,
    },
    #[error("`{endpoint}` failed after {attempts} attempt(s): {source}")]
    Exhausted { endpoint: String, attempts: u32, source: UpstreamError },
    #[error("`{endpoint}` rejected by upstream: {source}")]
    Rejected { endpoint: String, source: UpstreamError },
    #[error("`{endpoint}` skipped: dependency `{dependency}` did not succeed")]
    DependencyUnavailable { endpoint: String, dependency: String },
}

impl CallError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache entry could not be encoded: {0}")]
    Encode(String),
    #[error("cache entry could not be decoded: {0}")]
    Decode(String),
}

/// Malformed plan structure. The only planning failure that aborts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanContractError {
    #[error("call id `{0}` appears more than once in the plan")]
    DuplicateCallId(String),
    #[error("call `{call_id}` depends on `{dependency}`, which is not part of the plan")]
    UnknownDependency { call_id: String, dependency: String },
    #[error("call `{0}` has an empty endpoint name")]
    EmptyEndpoint(String),
}
