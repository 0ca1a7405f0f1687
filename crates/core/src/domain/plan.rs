use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::call::{CallId, CallSpec};

/// A named piece of data the caller needs, expressed as an endpoint plus any
/// parameters that are specific to this requirement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub call_id: Option<CallId>,
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), params: BTreeMap::new(), call_id: None, optional: false }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<CallId>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn non_essential(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Calls that could not be placed in any level because they sit on, or
/// depend on, a dependency cycle. Reported, never fatal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningError {
    pub unschedulable: Vec<CallId>,
}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self.unschedulable.iter().map(CallId::as_str).collect::<Vec<_>>();
        write!(f, "planning: dependency cycle leaves calls unschedulable: [{}]", ids.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacedCall {
    pub call_id: CallId,
    pub endpoint: String,
}

/// Record of a richer endpoint standing in for several narrower calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptimization {
    pub substitute: CallId,
    pub endpoint: String,
    pub replaced: Vec<ReplacedCall>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<CallSpec>>,
    #[serde(default)]
    pub planning_errors: Vec<PlanningError>,
    #[serde(default)]
    pub optimizations: Vec<PlanOptimization>,
}

impl ExecutionPlan {
    pub fn call_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.call_count() == 0
    }

    pub fn calls(&self) -> impl Iterator<Item = &CallSpec> {
        self.levels.iter().flatten()
    }

    pub fn find_call(&self, call_id: &CallId) -> Option<&CallSpec> {
        self.calls().find(|call| &call.call_id == call_id)
    }

    pub fn level_of(&self, call_id: &CallId) -> Option<usize> {
        self.levels.iter().position(|level| level.iter().any(|call| &call.call_id == call_id))
    }

    pub fn unschedulable(&self) -> impl Iterator<Item = &CallId> {
        self.planning_errors.iter().flat_map(|error| error.unschedulable.iter())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::call::{CallId, CallSpec};

    use super::{ExecutionPlan, PlanningError};

    #[test]
    fn plan_reports_levels_and_counts() {
        let plan = ExecutionPlan {
            levels: vec![
                vec![CallSpec::new("a", "team_search"), CallSpec::new("b", "team_search")],
                vec![CallSpec::new("c", "head_to_head").depending_on("a").depending_on("b")],
            ],
            ..ExecutionPlan::default()
        };

        assert_eq!(plan.call_count(), 3);
        assert_eq!(plan.level_of(&CallId::new("c")), Some(1));
        assert_eq!(plan.level_of(&CallId::new("missing")), None);
        assert!(!plan.is_empty());
    }

    #[test]
    fn planning_error_lists_unschedulable_calls() {
        let error = PlanningError { unschedulable: vec![CallId::new("x"), CallId::new("y")] };
        assert_eq!(
            error.to_string(),
            "planning: dependency cycle leaves calls unschedulable: [x, y]"
        );
    }
}
