//! Dependency planning.
//!
//! Turns requirements (or explicit call specs) into levels of calls that can
//! run concurrently. Planning is pure: no I/O, no clock, no randomness.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::cache::Canonicalizer;
use crate::catalog::{EndpointCatalog, EndpointDefinition};
use crate::domain::call::{CallId, CallSpec, ParamMap, ParamValue};
use crate::domain::plan::{ExecutionPlan, PlanOptimization, PlanningError, ReplacedCall, Requirement};
use crate::errors::PlanContractError;

pub struct DependencyPlanner {
    catalog: Arc<EndpointCatalog>,
    canonicalizer: Canonicalizer,
}

impl DependencyPlanner {
    pub fn new(catalog: Arc<EndpointCatalog>, canonicalizer: Canonicalizer) -> Self {
        Self { catalog, canonicalizer }
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    /// Expands requirements into calls, inserting resolver calls for
    /// parameters the catalog knows how to look up.
    pub fn plan(
        &self,
        requirements: &[Requirement],
        static_params: &BTreeMap<String, Value>,
    ) -> ExecutionPlan {
        let mut ids = IdAllocator::default();
        let mut resolvers = ResolverCalls::default();
        let mut calls = Vec::with_capacity(requirements.len());

        for requirement in requirements {
            let definition = self.catalog.get(&requirement.endpoint);
            let call_id = ids.allocate(
                requirement.call_id.as_ref().map(CallId::as_str).unwrap_or(requirement.endpoint.as_str()),
            );

            let mut literals = static_params
                .iter()
                .filter(|(key, _)| definition.is_some_and(|definition| definition.accepts_param(key)))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>();
            literals.extend(requirement.params.clone());

            let mut call = CallSpec::new(call_id, requirement.endpoint.clone());
            call.optional = requirement.optional;

            if let Some(definition) = definition {
                for resolver in &definition.resolvers {
                    if literals.contains_key(&resolver.param) {
                        continue;
                    }
                    let input = requirement
                        .params
                        .get(&resolver.input_param)
                        .or_else(|| static_params.get(&resolver.input_param));
                    let Some(input) = input else {
                        continue;
                    };

                    let resolver_params =
                        BTreeMap::from([(resolver.resolver_param.clone(), input.clone())]);
                    let resolver_id = resolvers.ensure(
                        &mut ids,
                        &self.canonicalizer,
                        &resolver.endpoint,
                        resolver_params,
                        requirement.optional,
                    );
                    call.params.insert(resolver.param.clone(), ParamValue::from_call(resolver_id, &resolver.path));
                }

                literals.retain(|key, _| {
                    definition.accepts_param(key) || definition.resolver_for_input(key).is_none()
                });
            }

            for (key, value) in literals {
                call.params.entry(key).or_insert(ParamValue::Literal(value));
            }
            calls.push(call);
        }

        let mut all_calls = resolvers.into_calls();
        all_calls.extend(calls);

        let (calls, optimizations) = self.optimize(all_calls, &mut ids);
        let mut plan = level(calls);
        plan.optimizations = optimizations;
        plan
    }

    /// Plans explicit calls. Structural mistakes abort; cycles do not.
    pub fn plan_calls(&self, calls: Vec<CallSpec>) -> Result<ExecutionPlan, PlanContractError> {
        validate(&calls)?;

        let mut ids = IdAllocator::default();
        for call in &calls {
            ids.reserve(call.call_id.as_str());
        }

        let (calls, optimizations) = self.optimize(calls, &mut ids);
        let mut plan = level(calls);
        plan.optimizations = optimizations;
        Ok(plan)
    }

    /// Replaces groups of calls with identical parameters by one call to an
    /// endpoint declared to subsume them all.
    fn optimize(
        &self,
        mut calls: Vec<CallSpec>,
        ids: &mut IdAllocator,
    ) -> (Vec<CallSpec>, Vec<PlanOptimization>) {
        let mut optimizations = Vec::new();

        for substitute in self.catalog.substitutes() {
            while let Some(group) =
                subsumable_groups(&calls, substitute).into_iter().find(|group| group.len() >= 2)
            {
                let members = group.iter().map(|index| &calls[*index]).collect::<Vec<_>>();
                let substitute_id = ids.allocate(&substitute.name);
                let replaced = members
                    .iter()
                    .map(|call| ReplacedCall { call_id: call.call_id.clone(), endpoint: call.endpoint.clone() })
                    .collect::<Vec<_>>();
                let replaced_ids = replaced.iter().map(|call| call.call_id.clone()).collect::<HashSet<_>>();

                let mut merged = CallSpec::new(substitute_id.clone(), substitute.name.clone());
                merged.params = members[0].params.clone();
                merged.optional = members.iter().all(|call| call.optional);
                for call in &members {
                    for dependency in &call.depends_on {
                        merged = merged.depending_on(dependency.clone());
                    }
                }

                let position = group[0];
                let mut rewritten = Vec::with_capacity(calls.len() + 1 - group.len());
                for (index, call) in calls.into_iter().enumerate() {
                    if index == position {
                        rewritten.push(merged.clone());
                    }
                    if !replaced_ids.contains(&call.call_id) {
                        rewritten.push(redirect(call, &replaced_ids, &substitute_id));
                    }
                }
                calls = rewritten;

                optimizations.push(PlanOptimization {
                    substitute: substitute_id,
                    endpoint: substitute.name.clone(),
                    replaced,
                });
            }
        }

        (calls, optimizations)
    }
}

/// Indices of calls that `substitute` could answer, grouped by identical
/// parameters. Groups are ordered by first appearance.
fn subsumable_groups(calls: &[CallSpec], substitute: &EndpointDefinition) -> Vec<Vec<usize>> {
    let mut groups: Vec<(&ParamMap, Vec<usize>)> = Vec::new();

    for (index, call) in calls.iter().enumerate() {
        let answerable = substitute.subsumes.contains(&call.endpoint)
            && call.params.keys().all(|key| substitute.accepts_param(key));
        if !answerable {
            continue;
        }
        match groups.iter_mut().find(|(params, _)| **params == call.params) {
            Some((_, members)) => members.push(index),
            None => groups.push((&call.params, vec![index])),
        }
    }

    groups.into_iter().map(|(_, members)| members).collect()
}

fn redirect(mut call: CallSpec, replaced: &HashSet<CallId>, substitute: &CallId) -> CallSpec {
    let mut depends_on = Vec::with_capacity(call.depends_on.len());
    for dependency in call.depends_on.drain(..) {
        let dependency = if replaced.contains(&dependency) { substitute.clone() } else { dependency };
        if !depends_on.contains(&dependency) {
            depends_on.push(dependency);
        }
    }
    call.depends_on = depends_on;

    for value in call.params.values_mut() {
        if let ParamValue::FromCall { call_id, .. } = value {
            if replaced.contains(call_id) {
                *call_id = substitute.clone();
            }
        }
    }
    call
}

fn validate(calls: &[CallSpec]) -> Result<(), PlanContractError> {
    let mut seen = HashSet::with_capacity(calls.len());
    for call in calls {
        if call.endpoint.trim().is_empty() {
            return Err(PlanContractError::EmptyEndpoint(call.call_id.to_string()));
        }
        if !seen.insert(&call.call_id) {
            return Err(PlanContractError::DuplicateCallId(call.call_id.to_string()));
        }
    }

    for call in calls {
        if let Some(dependency) = call.dependencies().into_iter().find(|dependency| !seen.contains(dependency)) {
            return Err(PlanContractError::UnknownDependency {
                call_id: call.call_id.to_string(),
                dependency: dependency.to_string(),
            });
        }
    }
    Ok(())
}

/// Frontier leveling. Whatever cannot be placed is reported, the rest runs.
fn level(calls: Vec<CallSpec>) -> ExecutionPlan {
    let mut scheduled = BTreeSet::new();
    let mut remaining = calls;
    let mut levels = Vec::new();

    loop {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|call| call.dependencies().iter().all(|dependency| scheduled.contains(dependency)));
        remaining = blocked;

        if ready.is_empty() {
            break;
        }
        scheduled.extend(ready.iter().map(|call| call.call_id.clone()));
        levels.push(ready);
    }

    let planning_errors = if remaining.is_empty() {
        Vec::new()
    } else {
        vec![PlanningError { unschedulable: remaining.into_iter().map(|call| call.call_id).collect() }]
    };

    ExecutionPlan { levels, planning_errors, optimizations: Vec::new() }
}

#[derive(Default)]
struct IdAllocator {
    taken: HashSet<String>,
}

impl IdAllocator {
    fn reserve(&mut self, id: &str) {
        self.taken.insert(id.to_owned());
    }

    /// `base`, or `base_2`, `base_3`, ... when taken.
    fn allocate(&mut self, base: &str) -> CallId {
        let mut candidate = base.to_owned();
        let mut suffix = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        CallId::new(candidate)
    }
}

/// Resolver calls de-duplicated by canonical cache key.
#[derive(Default)]
struct ResolverCalls {
    by_key: HashMap<String, usize>,
    calls: Vec<CallSpec>,
}

impl ResolverCalls {
    fn ensure(
        &mut self,
        ids: &mut IdAllocator,
        canonicalizer: &Canonicalizer,
        endpoint: &str,
        params: BTreeMap<String, Value>,
        optional: bool,
    ) -> CallId {
        let key = canonicalizer.cache_key(endpoint, &params);
        if let Some(index) = self.by_key.get(&key) {
            let call = &mut self.calls[*index];
            call.optional &= optional;
            return call.call_id.clone();
        }

        let canonical = canonicalizer.canonical_params(endpoint, &params);
        let label = canonical.values().map(String::as_str).map(slug).collect::<Vec<_>>().join("_");
        let base = if label.is_empty() { endpoint.to_owned() } else { format!("{endpoint}_{label}") };
        let call_id = ids.allocate(&base);

        let mut call = CallSpec::new(call_id.clone(), endpoint);
        call.params = params.into_iter().map(|(key, value)| (key, ParamValue::Literal(value))).collect();
        call.optional = optional;

        self.by_key.insert(key, self.calls.len());
        self.calls.push(call);
        call_id
    }

    fn into_calls(self) -> Vec<CallSpec> {
        self.calls
    }
}

fn slug(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for character in value.chars() {
        if character.is_ascii_alphanumeric() {
            slug.push(character);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_owned()
}
