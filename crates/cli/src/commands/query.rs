use std::collections::BTreeMap;

use clap::Args;
use kickoff_core::Requirement;
use serde_json::Value;

/// Requirements and static parameters shared by `plan` and `fetch`.
#[derive(Debug, Clone, Default, Args)]
pub struct QueryArgs {
    #[arg(
        long = "require",
        value_name = "[ID=]ENDPOINT",
        help = "Endpoint the result must contain; repeatable"
    )]
    pub require: Vec<String>,
    #[arg(
        long = "optional",
        value_name = "[ID=]ENDPOINT",
        help = "Endpoint whose failure is reported as a warning; repeatable"
    )]
    pub optional: Vec<String>,
    #[arg(
        long = "param",
        value_name = "KEY=VALUE",
        help = "Static parameter offered to every requirement; repeatable"
    )]
    pub params: Vec<String>,
}

pub type QueryRequest = (Vec<Requirement>, BTreeMap<String, Value>);

impl QueryArgs {
    pub fn into_request(self) -> Result<QueryRequest, String> {
        if self.require.is_empty() && self.optional.is_empty() {
            return Err("at least one --require or --optional endpoint is needed".to_string());
        }

        let mut requirements = Vec::with_capacity(self.require.len() + self.optional.len());
        for raw in &self.require {
            requirements.push(parse_requirement(raw)?);
        }
        for raw in &self.optional {
            requirements.push(parse_requirement(raw)?.non_essential());
        }

        let mut static_params = BTreeMap::new();
        for raw in &self.params {
            let (key, value) = parse_param(raw)?;
            static_params.insert(key, value);
        }

        Ok((requirements, static_params))
    }
}

fn parse_requirement(raw: &str) -> Result<Requirement, String> {
    let (call_id, endpoint) = match raw.split_once('=') {
        Some((call_id, endpoint)) => (Some(call_id.trim()), endpoint.trim()),
        None => (None, raw.trim()),
    };
    if endpoint.is_empty() || call_id.is_some_and(str::is_empty) {
        return Err(format!("invalid requirement `{raw}` (expected ENDPOINT or ID=ENDPOINT)"));
    }

    let requirement = Requirement::new(endpoint);
    Ok(match call_id {
        Some(call_id) => requirement.with_call_id(call_id),
        None => requirement,
    })
}

/// `KEY=VALUE`; numbers and booleans keep their JSON type, everything else is text.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("invalid parameter `{raw}` (expected KEY=VALUE)"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid parameter `{raw}` (empty key)"));
    }

    let value = match serde_json::from_str::<Value>(value.trim()) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
        _ => Value::String(value.trim().to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_param, QueryArgs};

    #[test]
    fn params_keep_scalar_types() {
        assert_eq!(parse_param("season=2024"), Ok(("season".to_string(), json!(2024))));
        assert_eq!(parse_param("current=true"), Ok(("current".to_string(), json!(true))));
        assert_eq!(
            parse_param("team_name=Manchester United"),
            Ok(("team_name".to_string(), json!("Manchester United")))
        );
        assert!(parse_param("season").is_err());
        assert!(parse_param("=2024").is_err());
    }

    #[test]
    fn requirements_accept_explicit_ids_and_optional_flags() {
        let args = QueryArgs {
            require: vec!["stats=team_statistics".to_string()],
            optional: vec!["injuries".to_string()],
            params: vec!["season=2024".to_string()],
        };

        let (requirements, static_params) = args.into_request().expect("valid request");
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[0].call_id.as_ref().map(|id| id.as_str()), Some("stats"));
        assert!(requirements[1].optional);
        assert_eq!(static_params.get("season"), Some(&json!(2024)));
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(QueryArgs::default().into_request().is_err());
    }
}
