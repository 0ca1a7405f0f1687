//! Placeholder resolution against payloads collected in earlier levels.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::call::{CallId, CallSpec, ParamValue};
use crate::domain::outcome::CollectedData;

/// Fallback chain, tried in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionStep {
    ExactKey,
    FirstElement,
    NestedPath,
    IdFallback,
}

const EXTRACTION_CHAIN: &[ExtractionStep] = &[
    ExtractionStep::ExactKey,
    ExtractionStep::FirstElement,
    ExtractionStep::NestedPath,
    ExtractionStep::IdFallback,
];

/// How deep the id fallback searches for an identifier key.
const ID_SEARCH_DEPTH: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum Extraction {
    Found { value: Value, step: ExtractionStep },
    Missing,
}

impl Extraction {
    pub fn value(self) -> Option<Value> {
        match self {
            Self::Found { value, .. } => Some(value),
            Self::Missing => None,
        }
    }
}

pub fn extract(payload: &Value, path: &str) -> Extraction {
    EXTRACTION_CHAIN
        .iter()
        .find_map(|step| {
            apply(*step, payload, path)
                .filter(|value| !value.is_null())
                .map(|value| Extraction::Found { value: value.clone(), step: *step })
        })
        .unwrap_or(Extraction::Missing)
}

fn apply<'a>(step: ExtractionStep, payload: &'a Value, path: &str) -> Option<&'a Value> {
    match step {
        ExtractionStep::ExactKey => payload.get(path),
        ExtractionStep::FirstElement => payload.as_array()?.first()?.get(path),
        ExtractionStep::NestedPath => path.split('.').try_fold(payload, |current, segment| {
            unwrap_list(current).get(segment)
        }),
        ExtractionStep::IdFallback => {
            let segments = path.split('.').collect::<Vec<_>>();
            let last = *segments.last()?;
            if last != "id" && !last.ends_with("_id") {
                return None;
            }
            let mut candidates = vec![segments.join("_"), last.to_owned()];
            if last != "id" {
                candidates.push("id".to_owned());
            }
            find_identifier(payload, &candidates, ID_SEARCH_DEPTH)
        }
    }
}

fn unwrap_list(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(value),
        _ => value,
    }
}

fn find_identifier<'a>(value: &'a Value, candidates: &[String], depth: usize) -> Option<&'a Value> {
    let value = unwrap_list(value);
    let object = value.as_object()?;

    for candidate in candidates {
        if let Some(found) = object.get(candidate).filter(|found| is_scalar(found)) {
            return Some(found);
        }
    }

    if depth == 0 {
        return None;
    }
    object.values().find_map(|nested| find_identifier(nested, candidates, depth - 1))
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Parameters ready to send, or the dependency that never produced data.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamResolution {
    Ready {
        params: BTreeMap<String, Value>,
        /// Parameters sent as literal placeholder text.
        unresolved: Vec<String>,
    },
    DependencyUnavailable(CallId),
}

pub fn resolve_params(call: &CallSpec, data: &CollectedData) -> ParamResolution {
    if let Some(missing) = call.dependencies().into_iter().find(|dependency| !data.contains_call(dependency)) {
        return ParamResolution::DependencyUnavailable(missing);
    }

    let mut params = BTreeMap::new();
    let mut unresolved = Vec::new();

    for (key, value) in &call.params {
        let resolved = match value {
            ParamValue::Literal(literal) => literal.clone(),
            ParamValue::FromCall { call_id, path } => {
                match data.call(call_id).and_then(|payload| extract(payload, path).value()) {
                    Some(found) => found,
                    None => {
                        unresolved.push(key.clone());
                        Value::String(value.placeholder_text().unwrap_or_default())
                    }
                }
            }
        };
        params.insert(key.clone(), resolved);
    }

    ParamResolution::Ready { params, unresolved }
}
