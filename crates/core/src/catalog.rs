//! Static endpoint classification table.
//!
//! Each endpoint declares how its responses may be cached, which parameters it
//! accepts, which missing parameters can be resolved by an earlier call, and
//! which narrower endpoints it subsumes. The planner, executor and canonicalizer
//! all read from the same table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Static cache classification of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Reference data that never changes (countries, venues).
    Indefinite,
    /// Day-scale data (team profiles, season statistics).
    Long,
    /// Minute-scale data (fixtures, standings).
    Short,
    /// Never cached (live odds).
    NoCache,
}

/// A missing parameter that can be produced by calling another endpoint first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamResolver {
    /// Parameter of the dependent endpoint that receives the resolved value.
    pub param: String,
    /// Endpoint that resolves it.
    pub endpoint: String,
    /// Static parameter the caller supplies (e.g. `team_name`).
    pub input_param: String,
    /// Name of that value on the resolving endpoint (e.g. `name`).
    pub resolver_param: String,
    /// Extraction path into the resolver's payload.
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    pub name: String,
    pub path: String,
    pub strategy: CacheStrategy,
    /// Payload status (finished, in play, ...) overrides `strategy` when present.
    pub status_sensitive: bool,
    pub accepts: Vec<String>,
    pub resolvers: Vec<ParamResolver>,
    /// Two keys whose values form an unordered pair.
    pub unordered_pair: Option<(String, String)>,
    /// Narrower endpoints whose data this one already contains.
    pub subsumes: Vec<String>,
    /// Parameter renames applied when building the upstream query.
    pub query_aliases: Vec<(String, String)>,
}

impl EndpointDefinition {
    pub fn new(name: &str, path: &str, strategy: CacheStrategy) -> Self {
        Self {
            name: name.to_owned(),
            path: path.to_owned(),
            strategy,
            status_sensitive: false,
            accepts: Vec::new(),
            resolvers: Vec::new(),
            unordered_pair: None,
            subsumes: Vec::new(),
            query_aliases: Vec::new(),
        }
    }

    pub fn accepting(mut self, params: &[&str]) -> Self {
        self.accepts.extend(params.iter().map(|param| (*param).to_owned()));
        self
    }

    pub fn status_sensitive(mut self) -> Self {
        self.status_sensitive = true;
        self
    }

    pub fn resolving(
        mut self,
        param: &str,
        endpoint: &str,
        input_param: &str,
        resolver_param: &str,
        path: &str,
    ) -> Self {
        self.resolvers.push(ParamResolver {
            param: param.to_owned(),
            endpoint: endpoint.to_owned(),
            input_param: input_param.to_owned(),
            resolver_param: resolver_param.to_owned(),
            path: path.to_owned(),
        });
        self
    }

    pub fn with_unordered_pair(mut self, first: &str, second: &str) -> Self {
        self.unordered_pair = Some((first.to_owned(), second.to_owned()));
        self
    }

    pub fn subsuming(mut self, endpoints: &[&str]) -> Self {
        self.subsumes.extend(endpoints.iter().map(|endpoint| (*endpoint).to_owned()));
        self
    }

    pub fn with_query_alias(mut self, param: &str, query_name: &str) -> Self {
        self.query_aliases.push((param.to_owned(), query_name.to_owned()));
        self
    }

    pub fn accepts_param(&self, param: &str) -> bool {
        self.accepts.iter().any(|accepted| accepted == param)
    }

    pub fn resolver_for(&self, param: &str) -> Option<&ParamResolver> {
        self.resolvers.iter().find(|resolver| resolver.param == param)
    }

    pub fn resolver_for_input(&self, input_param: &str) -> Option<&ParamResolver> {
        self.resolvers.iter().find(|resolver| resolver.input_param == input_param)
    }

    pub fn query_name<'a>(&'a self, param: &'a str) -> &'a str {
        self.query_aliases
            .iter()
            .find(|(from, _)| from == param)
            .map(|(_, to)| to.as_str())
            .unwrap_or(param)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCatalog {
    endpoints: BTreeMap<String, EndpointDefinition>,
}

impl EndpointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: EndpointDefinition) {
        self.endpoints.insert(definition.name.clone(), definition);
    }

    pub fn with(mut self, definition: EndpointDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, endpoint: &str) -> Option<&EndpointDefinition> {
        self.endpoints.get(endpoint)
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }

    /// Unknown endpoints are never cached.
    pub fn strategy(&self, endpoint: &str) -> CacheStrategy {
        self.get(endpoint).map(|definition| definition.strategy).unwrap_or(CacheStrategy::NoCache)
    }

    pub fn is_status_sensitive(&self, endpoint: &str) -> bool {
        self.get(endpoint).is_some_and(|definition| definition.status_sensitive)
    }

    pub fn unordered_pair(&self, endpoint: &str) -> Option<(&str, &str)> {
        self.get(endpoint)
            .and_then(|definition| definition.unordered_pair.as_ref())
            .map(|(first, second)| (first.as_str(), second.as_str()))
    }

    /// Endpoints that declare they subsume at least two others.
    pub fn substitutes(&self) -> impl Iterator<Item = &EndpointDefinition> {
        self.endpoints.values().filter(|definition| definition.subsumes.len() >= 2)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Structural problems: references to unknown endpoints, pair keys the
    /// endpoint does not accept.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for definition in self.endpoints.values() {
            for resolver in &definition.resolvers {
                match self.get(&resolver.endpoint) {
                    None => problems.push(format!(
                        "`{}` resolves `{}` through unknown endpoint `{}`",
                        definition.name, resolver.param, resolver.endpoint
                    )),
                    Some(target) if !target.accepts_param(&resolver.resolver_param) => {
                        problems.push(format!(
                            "`{}` does not accept `{}` required to resolve `{}.{}`",
                            target.name, resolver.resolver_param, definition.name, resolver.param
                        ))
                    }
                    Some(_) => {}
                }
            }

            for subsumed in &definition.subsumes {
                if !self.contains(subsumed) {
                    problems.push(format!(
                        "`{}` subsumes unknown endpoint `{subsumed}`",
                        definition.name
                    ));
                }
            }

            if let Some((first, second)) = &definition.unordered_pair {
                for key in [first, second] {
                    if !definition.accepts_param(key) {
                        problems.push(format!(
                            "`{}` declares pair key `{key}` it does not accept",
                            definition.name
                        ));
                    }
                }
            }
        }

        problems
    }

    /// Football data provider table (API-Football v3 layout).
    pub fn football() -> Self {
        use CacheStrategy::{Indefinite, Long, NoCache, Short};

        Self::new()
            .with(EndpointDefinition::new("countries", "/countries", Indefinite).accepting(&[
                "name", "code", "search",
            ]))
            .with(EndpointDefinition::new("venues", "/venues", Indefinite).accepting(&[
                "id", "name", "city", "country", "search",
            ]))
            .with(EndpointDefinition::new("seasons", "/leagues/seasons", Indefinite))
            .with(EndpointDefinition::new("leagues", "/leagues", Long).accepting(&[
                "id", "name", "country", "season", "search", "current",
            ]))
            .with(
                EndpointDefinition::new("team_search", "/teams", Long)
                    .accepting(&["id", "name", "search", "league", "season", "country"]),
            )
            .with(
                EndpointDefinition::new("team_statistics", "/teams/statistics", Long)
                    .accepting(&["team", "league", "season", "date"])
                    .resolving("team", "team_search", "team_name", "name", "team.id")
                    .resolving("league", "leagues", "league_name", "name", "league.id"),
            )
            .with(
                EndpointDefinition::new("standings", "/standings", Short)
                    .accepting(&["league", "season", "team"])
                    .resolving("league", "leagues", "league_name", "name", "league.id"),
            )
            .with(
                EndpointDefinition::new("fixtures", "/fixtures", Short)
                    .status_sensitive()
                    .accepting(&[
                        "id", "date", "league", "season", "team", "last", "next", "from", "to",
                        "status",
                    ])
                    .resolving("team", "team_search", "team_name", "name", "team.id"),
            )
            .with(
                EndpointDefinition::new("head_to_head", "/fixtures/headtohead", Long)
                    .accepting(&["a", "b", "h2h", "last", "league", "season"])
                    .with_unordered_pair("a", "b")
                    .resolving("a", "team_search", "team_a_name", "name", "team.id")
                    .resolving("b", "team_search", "team_b_name", "name", "team.id"),
            )
            .with(
                EndpointDefinition::new("fixture_detail", "/fixtures", Short)
                    .status_sensitive()
                    .accepting(&["fixture"])
                    .with_query_alias("fixture", "id")
                    .subsuming(&[
                        "fixture_statistics",
                        "fixture_events",
                        "fixture_lineups",
                        "fixture_players",
                    ]),
            )
            .with(
                EndpointDefinition::new("fixture_statistics", "/fixtures/statistics", Short)
                    .status_sensitive()
                    .accepting(&["fixture", "team"]),
            )
            .with(
                EndpointDefinition::new("fixture_events", "/fixtures/events", Short)
                    .status_sensitive()
                    .accepting(&["fixture", "team", "player", "type"]),
            )
            .with(
                EndpointDefinition::new("fixture_lineups", "/fixtures/lineups", Short)
                    .status_sensitive()
                    .accepting(&["fixture", "team"]),
            )
            .with(
                EndpointDefinition::new("fixture_players", "/fixtures/players", Short)
                    .status_sensitive()
                    .accepting(&["fixture", "team"]),
            )
            .with(
                EndpointDefinition::new("player_search", "/players/profiles", Long)
                    .accepting(&["search", "player", "page"]),
            )
            .with(
                EndpointDefinition::new("player_statistics", "/players", Long)
                    .accepting(&["id", "team", "league", "season", "search"])
                    .resolving("id", "player_search", "player_name", "search", "player.id")
                    .resolving("team", "team_search", "team_name", "name", "team.id"),
            )
            .with(
                EndpointDefinition::new("injuries", "/injuries", Short)
                    .accepting(&["league", "season", "fixture", "team", "player", "date"]),
            )
            .with(EndpointDefinition::new("predictions", "/predictions", Short).accepting(&["fixture"]))
            .with(
                EndpointDefinition::new("odds_live", "/odds/live", NoCache)
                    .accepting(&["fixture", "league"]),
            )
    }
}
