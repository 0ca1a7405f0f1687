use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A parameter is either known at planning time or extracted from the payload
/// of an earlier call once that call has settled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Literal(Value),
    FromCall { call_id: CallId, path: String },
}

impl ParamValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn from_call(call_id: impl Into<CallId>, path: impl Into<String>) -> Self {
        Self::FromCall { call_id: call_id.into(), path: path.into() }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::FromCall { .. } => None,
        }
    }

    pub fn referenced_call(&self) -> Option<&CallId> {
        match self {
            Self::Literal(_) => None,
            Self::FromCall { call_id, .. } => Some(call_id),
        }
    }

    /// Literal text sent upstream when a placeholder cannot be resolved.
    pub fn placeholder_text(&self) -> Option<String> {
        match self {
            Self::Literal(_) => None,
            Self::FromCall { call_id, path } => Some(format!("{{{{{call_id}.{path}}}}}")),
        }
    }
}

pub type ParamMap = BTreeMap<String, ParamValue>;

/// One upstream call inside a plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    pub call_id: CallId,
    pub endpoint: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub depends_on: Vec<CallId>,
    /// Non-essential calls report failures as warnings instead of batch errors.
    #[serde(default)]
    pub optional: bool,
}

impl CallSpec {
    pub fn new(call_id: impl Into<CallId>, endpoint: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            endpoint: endpoint.into(),
            params: ParamMap::new(),
            depends_on: Vec::new(),
            optional: false,
        }
    }

    pub fn with_literal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), ParamValue::literal(value));
        self
    }

    pub fn with_placeholder(
        mut self,
        key: impl Into<String>,
        call_id: impl Into<CallId>,
        path: impl Into<String>,
    ) -> Self {
        self.params.insert(key.into(), ParamValue::from_call(call_id, path));
        self
    }

    pub fn depending_on(mut self, call_id: impl Into<CallId>) -> Self {
        let call_id = call_id.into();
        if !self.depends_on.contains(&call_id) {
            self.depends_on.push(call_id);
        }
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Declared dependencies plus every call referenced by a placeholder.
    pub fn dependencies(&self) -> BTreeSet<CallId> {
        let mut dependencies = self.depends_on.iter().cloned().collect::<BTreeSet<_>>();
        dependencies.extend(self.params.values().filter_map(ParamValue::referenced_call).cloned());
        dependencies
    }

    pub fn literal_params(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .filter_map(|(key, value)| value.as_literal().map(|literal| (key.clone(), literal.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CallId, CallSpec, ParamValue};

    #[test]
    fn dependencies_include_placeholder_references() {
        let call = CallSpec::new("h2h", "head_to_head")
            .with_placeholder("a", "resolve_arsenal", "team.id")
            .with_placeholder("b", "resolve_chelsea", "team.id")
            .depending_on("season_lookup");

        let dependencies = call.dependencies();
        assert_eq!(dependencies.len(), 3);
        assert!(dependencies.contains(&CallId::new("resolve_arsenal")));
        assert!(dependencies.contains(&CallId::new("season_lookup")));
    }

    #[test]
    fn placeholder_text_names_call_and_path() {
        let value = ParamValue::from_call("resolve_chelsea", "team.id");
        assert_eq!(value.placeholder_text().as_deref(), Some("{{resolve_chelsea.team.id}}"));
        assert_eq!(ParamValue::literal(json!(42)).placeholder_text(), None);
    }

    #[test]
    fn literal_params_skip_placeholders() {
        let call = CallSpec::new("stats", "team_statistics")
            .with_literal("season", 2024)
            .with_placeholder("team", "resolve", "team.id");

        let literals = call.literal_params();
        assert_eq!(literals.len(), 1);
        assert_eq!(literals.get("season"), Some(&json!(2024)));
    }
}
