//! HTTP client for the football data provider.
//!
//! Translates catalog endpoints into provider requests and provider failures
//! into the typed `UpstreamError` the engine classifies for retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kickoff_core::catalog::{EndpointCatalog, EndpointDefinition};
use kickoff_core::config::{AppConfig, ConfigError};
use kickoff_core::{UpstreamClient, UpstreamError};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-apisports-key";

#[derive(Debug, Error)]
pub enum HttpUpstreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpUpstream {
    client: Client,
    base_url: String,
    api_key: SecretString,
    catalog: Arc<EndpointCatalog>,
}

impl HttpUpstream {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        timeout: Duration,
        catalog: Arc<EndpointCatalog>,
    ) -> Result<Self, HttpUpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned(), api_key, catalog })
    }

    pub fn from_config(config: &AppConfig, catalog: Arc<EndpointCatalog>) -> Result<Self, HttpUpstreamError> {
        let api_key = config.require_api_key()?.clone();
        Self::new(&config.upstream.base_url, api_key, config.upstream_timeout(), catalog)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn definition(&self, endpoint: &str) -> Result<&EndpointDefinition, UpstreamError> {
        self.catalog
            .get(endpoint)
            .ok_or_else(|| UpstreamError::BadRequest(format!("unknown endpoint `{endpoint}`")))
    }
}

#[async_trait::async_trait]
impl UpstreamClient for HttpUpstream {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, UpstreamError> {
        let definition = self.definition(endpoint)?;
        let url = format!("{}{}", self.base_url, definition.path);
        let query = build_query(definition, params);
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(
            event_name = "upstream.response.received",
            endpoint = %endpoint,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream responded"
        );

        if let Some(error) = classify_status(status) {
            return Err(error);
        }

        let body = response.json::<Value>().await.map_err(|error| UpstreamError::Decode(error.to_string()))?;
        unwrap_envelope(body)
    }
}

/// Query pairs for a request. Unordered pairs collapse into the provider's
/// `h2h=a-b` form and aliased parameters take their provider name.
pub fn build_query(definition: &EndpointDefinition, params: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    let mut query = Vec::with_capacity(params.len());
    let mut consumed = Vec::new();

    if let Some((first, second)) = &definition.unordered_pair {
        if let (Some(a), Some(b)) = (params.get(first), params.get(second)) {
            query.push(("h2h".to_owned(), format!("{}-{}", query_value(a), query_value(b))));
            consumed.extend([first.as_str(), second.as_str()]);
        }
    }

    for (key, value) in params {
        if consumed.contains(&key.as_str()) || value.is_null() {
            continue;
        }
        query.push((definition.query_name(key).to_owned(), query_value(value)));
    }
    query
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn classify_status(status: StatusCode) -> Option<UpstreamError> {
    if status.is_success() {
        return None;
    }
    let reason = status.to_string();
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited(reason),
        StatusCode::NOT_FOUND => UpstreamError::NotFound(reason),
        StatusCode::REQUEST_TIMEOUT => UpstreamError::Transport(reason),
        status if status.is_client_error() => UpstreamError::BadRequest(reason),
        _ => UpstreamError::Transport(reason),
    })
}

/// The provider answers `200` with an `errors` member for quota and
/// validation failures; the data itself sits under `response`.
pub fn unwrap_envelope(body: Value) -> Result<Value, UpstreamError> {
    if let Some(error) = envelope_error(&body) {
        return Err(error);
    }

    match body {
        Value::Object(mut envelope) => match envelope.remove("response") {
            Some(response) => Ok(response),
            None => Ok(Value::Object(envelope)),
        },
        other => Ok(other),
    }
}

fn envelope_error(body: &Value) -> Option<UpstreamError> {
    let messages = match body.get("errors")? {
        Value::Object(errors) if !errors.is_empty() => errors
            .iter()
            .map(|(key, message)| (key.clone(), query_value(message)))
            .collect::<Vec<_>>(),
        Value::Array(errors) if !errors.is_empty() => {
            errors.iter().map(|message| (String::new(), query_value(message))).collect()
        }
        _ => return None,
    };

    let summary = messages
        .iter()
        .map(|(key, message)| if key.is_empty() { message.clone() } else { format!("{key}: {message}") })
        .collect::<Vec<_>>()
        .join("; ");

    let rate_limited = messages.iter().any(|(key, message)| {
        let key = key.to_ascii_lowercase();
        let message = message.to_ascii_lowercase();
        key.contains("ratelimit") || key == "requests" || message.contains("too many requests")
    });

    Some(if rate_limited { UpstreamError::RateLimited(summary) } else { UpstreamError::BadRequest(summary) })
}

fn transport_error(error: reqwest::Error) -> UpstreamError {
    if error.is_decode() {
        UpstreamError::Decode(error.to_string())
    } else {
        UpstreamError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::Duration;

    use kickoff_core::catalog::EndpointCatalog;
    use kickoff_core::{UpstreamClient, UpstreamError};
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{build_query, classify_status, unwrap_envelope, HttpUpstream};

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(key, value)| ((*key).to_owned(), value.clone())).collect()
    }

    #[test]
    fn head_to_head_pair_collapses_into_h2h() {
        let catalog = EndpointCatalog::football();
        let definition = catalog.get("head_to_head").expect("head_to_head registered");

        let query = build_query(definition, &params(&[("a", json!(42)), ("b", json!(49)), ("last", json!(5))]));

        assert_eq!(query, vec![("h2h".to_owned(), "42-49".to_owned()), ("last".to_owned(), "5".to_owned())]);
    }

    #[test]
    fn aliased_params_use_provider_names() {
        let catalog = EndpointCatalog::football();
        let definition = catalog.get("fixture_detail").expect("fixture_detail registered");

        let query = build_query(definition, &params(&[("fixture", json!(1035))]));
        assert_eq!(query, vec![("id".to_owned(), "1035".to_owned())]);

        let search = catalog.get("team_search").expect("team_search registered");
        let query = build_query(search, &params(&[("name", json!("Arsenal"))]));
        assert_eq!(query, vec![("name".to_owned(), "Arsenal".to_owned())]);
    }

    #[test]
    fn status_codes_map_to_retry_classes() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert!(matches!(classify_status(StatusCode::TOO_MANY_REQUESTS), Some(UpstreamError::RateLimited(_))));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND), Some(UpstreamError::NotFound(_))));
        assert!(matches!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), Some(UpstreamError::BadRequest(_))));
        assert!(matches!(classify_status(StatusCode::BAD_GATEWAY), Some(UpstreamError::Transport(_))));
    }

    #[test]
    fn envelope_errors_are_typed() {
        let quota = json!({"errors": {"rateLimit": "Too many requests. Your rate limit is 10 per minute."}, "response": []});
        assert!(matches!(unwrap_envelope(quota), Err(UpstreamError::RateLimited(_))));

        let invalid = json!({"errors": {"season": "The Season field must contain 4 characters."}, "response": []});
        match unwrap_envelope(invalid) {
            Err(UpstreamError::BadRequest(message)) => assert!(message.starts_with("season: ")),
            other => panic!("expected bad request, got {other:?}"),
        }

        let ok = json!({"errors": [], "results": 1, "response": [{"team": {"id": 42}}]});
        assert_eq!(unwrap_envelope(ok), Ok(json!([{"team": {"id": 42}}])));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let upstream = HttpUpstream::new(
            &format!("http://127.0.0.1:{port}/"),
            SecretString::from("test-key".to_owned()),
            Duration::from_secs(2),
            Arc::new(EndpointCatalog::football()),
        )
        .expect("client");

        let error = upstream.fetch("countries", &BTreeMap::new()).await.expect_err("nothing listening");
        assert!(error.is_transient(), "unexpected error: {error:?}");

        let unknown = upstream.fetch("not_an_endpoint", &BTreeMap::new()).await.expect_err("unknown");
        assert!(matches!(unknown, UpstreamError::BadRequest(_)));
    }
}
