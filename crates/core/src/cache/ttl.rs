use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::CacheStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Indefinite,
    Long,
    Short,
    Live,
    None,
}

impl TtlClass {
    pub fn is_cacheable(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Match status read from a fixture payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusHint {
    Finished,
    Postponed,
    Scheduled,
    InPlay,
}

const FINISHED_CODES: &[&str] = &["FT", "AET", "PEN", "FINISHED", "MATCH FINISHED"];
const POSTPONED_CODES: &[&str] = &["PST", "CANC", "ABD", "AWD", "WO", "POSTPONED", "CANCELLED"];
const SCHEDULED_CODES: &[&str] = &["NS", "TBD", "SCHEDULED", "NOT STARTED"];
const IN_PLAY_CODES: &[&str] =
    &["1H", "HT", "2H", "ET", "BT", "P", "SUSP", "INT", "LIVE", "IN PLAY", "IN_PROGRESS"];

/// Places a status code may live in, tried in order.
const STATUS_PATHS: &[&[&str]] = &[
    &["fixture", "status", "short"],
    &["status", "short"],
    &["fixture", "status"],
    &["status"],
];

impl StatusHint {
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        let code = code.as_str();
        if FINISHED_CODES.contains(&code) {
            Some(Self::Finished)
        } else if IN_PLAY_CODES.contains(&code) {
            Some(Self::InPlay)
        } else if SCHEDULED_CODES.contains(&code) {
            Some(Self::Scheduled)
        } else if POSTPONED_CODES.contains(&code) {
            Some(Self::Postponed)
        } else {
            None
        }
    }

    /// Reads the hint from a payload. For a list of fixtures the least stable
    /// status wins, so one live match keeps the whole list short-lived.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        match payload {
            Value::Array(items) => items.iter().filter_map(Self::from_object).max(),
            Value::Object(_) => Self::from_object(payload),
            _ => None,
        }
    }

    fn from_object(value: &Value) -> Option<Self> {
        STATUS_PATHS.iter().find_map(|path| {
            let mut current = value;
            for segment in *path {
                current = current.get(segment)?;
            }
            current.as_str().and_then(Self::parse)
        })
    }
}

/// Maps endpoint classification and status hints to cache lifetimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    pub long: Duration,
    pub short: Duration,
    pub live: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            long: Duration::from_secs(24 * 60 * 60),
            short: Duration::from_secs(5 * 60),
            live: Duration::from_secs(15),
        }
    }
}

impl TtlPolicy {
    pub fn classify(strategy: CacheStrategy, hint: Option<StatusHint>) -> TtlClass {
        match hint {
            Some(StatusHint::Finished) => TtlClass::Indefinite,
            Some(StatusHint::InPlay) => TtlClass::Live,
            Some(StatusHint::Scheduled) => TtlClass::Short,
            Some(StatusHint::Postponed) => TtlClass::Long,
            None => match strategy {
                CacheStrategy::Indefinite => TtlClass::Indefinite,
                CacheStrategy::Long => TtlClass::Long,
                CacheStrategy::Short => TtlClass::Short,
                CacheStrategy::NoCache => TtlClass::None,
            },
        }
    }

    /// Lifetime for a class. `None` means the entry never expires; callers
    /// check `TtlClass::is_cacheable` before storing.
    pub fn expiry(&self, class: TtlClass) -> Option<Duration> {
        match class {
            TtlClass::Indefinite | TtlClass::None => None,
            TtlClass::Long => Some(self.long),
            TtlClass::Short => Some(self.short),
            TtlClass::Live => Some(self.live),
        }
    }
}
