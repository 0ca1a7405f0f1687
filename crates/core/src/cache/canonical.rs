//! Parameter canonicalization and cache-key construction.
//!
//! Semantically identical requests from unrelated callers must land on the
//! same key: `Man Utd` and `manchester united`, `05/03/2024` and `2024-03-05`,
//! `h2h=33-34` and `h2h=34-33`. Canonicalization is idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::catalog::EndpointCatalog;

/// Parameters whose single value is an unordered `X-Y` pair.
const PAIR_VALUED_PARAMS: &[&str] = &["h2h"];

const DATE_PARAMS: &[&str] = &["date", "from", "to"];

/// Day-first wins for ambiguous numeric dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
];

/// Surface aliases collapsed to one token. Canonical tokens never appear as
/// aliases themselves.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("man utd", "manchester united"),
    ("man united", "manchester united"),
    ("mufc", "manchester united"),
    ("manchester utd", "manchester united"),
    ("man city", "manchester city"),
    ("mcfc", "manchester city"),
    ("spurs", "tottenham"),
    ("tottenham hotspur", "tottenham"),
    ("thfc", "tottenham"),
    ("arsenal fc", "arsenal"),
    ("afc", "arsenal"),
    ("the gunners", "arsenal"),
    ("chelsea fc", "chelsea"),
    ("cfc", "chelsea"),
    ("liverpool fc", "liverpool"),
    ("lfc", "liverpool"),
    ("newcastle united", "newcastle"),
    ("nufc", "newcastle"),
    ("wolves", "wolverhampton"),
    ("wolverhampton wanderers", "wolverhampton"),
    ("barca", "barcelona"),
    ("fc barcelona", "barcelona"),
    ("psg", "paris saint germain"),
    ("paris sg", "paris saint germain"),
    ("paris saint-germain", "paris saint germain"),
    ("bayern", "bayern munich"),
    ("fc bayern", "bayern munich"),
    ("bayern münchen", "bayern munich"),
    ("internazionale", "inter"),
    ("inter milan", "inter"),
    ("epl", "premier league"),
    ("prem", "premier league"),
    ("english premier league", "premier league"),
    ("la liga", "laliga"),
];

#[derive(Clone, Debug)]
pub struct Canonicalizer {
    prefix: String,
    aliases: BTreeMap<String, String>,
    catalog: Arc<EndpointCatalog>,
}

impl Canonicalizer {
    pub fn new(prefix: impl Into<String>, catalog: Arc<EndpointCatalog>) -> Self {
        let aliases = DEFAULT_ALIASES
            .iter()
            .map(|(alias, canonical)| ((*alias).to_owned(), (*canonical).to_owned()))
            .collect();
        Self { prefix: prefix.into(), aliases, catalog }
    }

    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases.insert(normalize_text(alias), normalize_text(canonical));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key prefix shared by every entry of `endpoint`.
    pub fn endpoint_prefix(&self, endpoint: &str) -> String {
        format!("{}:{endpoint}:", self.prefix)
    }

    /// `{prefix}:{endpoint}:{k1}:{v1}|{k2}:{v2}` over canonicalized parameters.
    pub fn cache_key(&self, endpoint: &str, params: &BTreeMap<String, Value>) -> String {
        let pairs = self
            .canonical_params(endpoint, params)
            .into_iter()
            .map(|(key, value)| format!("{key}:{value}"))
            .collect::<Vec<_>>();
        format!("{}{}", self.endpoint_prefix(endpoint), pairs.join("|"))
    }

    pub fn canonical_params(
        &self,
        endpoint: &str,
        params: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, String> {
        let mut canonical = params
            .iter()
            .map(|(key, value)| (key.clone(), self.canonical_value(key, value)))
            .collect::<BTreeMap<_, _>>();

        if let Some((first, second)) = self.catalog.unordered_pair(endpoint) {
            if let (Some(a), Some(b)) = (canonical.get(first), canonical.get(second)) {
                if a > b {
                    let (a, b) = (a.clone(), b.clone());
                    canonical.insert(first.to_owned(), b);
                    canonical.insert(second.to_owned(), a);
                }
            }
        }

        canonical
    }

    pub fn canonical_value(&self, key: &str, value: &Value) -> String {
        match value {
            Value::String(text) => self.canonical_text(key, text),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => String::new(),
            Value::Array(items) => {
                items.iter().map(|item| self.canonical_value(key, item)).collect::<Vec<_>>().join(",")
            }
            Value::Object(_) => value.to_string(),
        }
    }

    pub fn canonical_text(&self, key: &str, text: &str) -> String {
        if is_date_param(key) {
            if let Some(date) = parse_date(text) {
                return date.format("%Y-%m-%d").to_string();
            }
        }

        if PAIR_VALUED_PARAMS.contains(&key) {
            let mut members =
                text.split('-').map(|member| self.canonical_token(member)).collect::<Vec<_>>();
            members.sort();
            return members.join("-");
        }

        self.canonical_token(text)
    }

    fn canonical_token(&self, text: &str) -> String {
        let normalized = normalize_text(text);
        self.aliases.get(&normalized).cloned().unwrap_or(normalized)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn is_date_param(key: &str) -> bool {
    DATE_PARAMS.contains(&key) || key.ends_with("_date")
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|datetime| datetime.date_naive()))
}
