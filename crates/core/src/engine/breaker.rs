//! Circuit breaker guarding the upstream provider.
//!
//! ```text
//! Closed   -> Open      consecutive failures reach the threshold
//! Open     -> HalfOpen  cool-down elapsed since the last failure
//! HalfOpen -> Closed    the single probe succeeds
//! HalfOpen -> Open      the probe fails; cool-down restarts
//! ```
//!
//! All state lives behind one mutex so a transition and the counter it reads
//! are always observed together. Attempts are admitted through a
//! [`BreakerPermit`]; a probe permit dropped without a verdict (for example
//! when the batch deadline cancels the attempt) hands the slot back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitState {
    pub mode: CircuitMode,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    probe_in_flight: bool,
    #[serde(skip)]
    probe_generation: u64,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            mode: CircuitMode::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            probe_generation: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

/// How an attempt was let through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The one call allowed while half-open.
    Probe,
}

/// Permission for one network attempt.
///
/// Settle it with [`succeed`](Self::succeed), [`fail`](Self::fail) or
/// [`release`](Self::release). Dropping an unsettled probe permit releases the
/// half-open slot.
#[must_use = "an unsettled probe permit is released on drop"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    generation: u64,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    /// Gives the slot back without a verdict, e.g. when the probe got a
    /// non-transient answer that says nothing about upstream health.
    pub fn release(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.release_probe(self.generation);
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self { name: name.into(), settings, clock, state: Mutex::new(CircuitState::default()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().clone()
    }

    pub fn mode(&self) -> CircuitMode {
        self.state.lock().mode
    }

    /// Whether an attempt would currently be admitted. Does not change state.
    pub fn admits(&self) -> bool {
        let state = self.state.lock();
        match state.mode {
            CircuitMode::Closed => true,
            CircuitMode::Open => self.cooldown_elapsed(&state),
            CircuitMode::HalfOpen => !state.probe_in_flight,
        }
    }

    /// Claims permission for one network attempt. `None` means fail fast.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let mut state = self.state.lock();
        match state.mode {
            CircuitMode::Closed => Some(self.permit(Admission::Normal, state.probe_generation)),
            CircuitMode::Open if self.cooldown_elapsed(&state) => {
                state.mode = CircuitMode::HalfOpen;
                info!(
                    event_name = "engine.breaker.half_open",
                    breaker = %self.name,
                    "cool-down elapsed; admitting a single probe"
                );
                Some(self.claim_probe(&mut state))
            }
            CircuitMode::Open => None,
            CircuitMode::HalfOpen if !state.probe_in_flight => Some(self.claim_probe(&mut state)),
            CircuitMode::HalfOpen => None,
        }
    }

    fn claim_probe(&self, state: &mut CircuitState) -> BreakerPermit<'_> {
        state.probe_in_flight = true;
        state.probe_generation = state.probe_generation.wrapping_add(1);
        self.permit(Admission::Probe, state.probe_generation)
    }

    fn permit(&self, admission: Admission, generation: u64) -> BreakerPermit<'_> {
        BreakerPermit { breaker: self, admission, generation, settled: false }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.mode {
            CircuitMode::Closed => state.consecutive_failures = 0,
            CircuitMode::HalfOpen => {
                state.mode = CircuitMode::Closed;
                state.consecutive_failures = 0;
                state.probe_in_flight = false;
                info!(
                    event_name = "engine.breaker.closed",
                    breaker = %self.name,
                    "probe succeeded; upstream calls resumed"
                );
            }
            // A straggler admitted before the breaker opened proves nothing.
            CircuitMode::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);

        match state.mode {
            CircuitMode::Closed if state.consecutive_failures >= self.settings.failure_threshold => {
                state.mode = CircuitMode::Open;
                warn!(
                    event_name = "engine.breaker.opened",
                    breaker = %self.name,
                    consecutive_failures = state.consecutive_failures,
                    cooldown_secs = self.settings.cooldown.as_secs(),
                    "failure threshold reached; failing fast"
                );
            }
            CircuitMode::HalfOpen => {
                state.mode = CircuitMode::Open;
                state.probe_in_flight = false;
                warn!(
                    event_name = "engine.breaker.reopened",
                    breaker = %self.name,
                    "probe failed; cool-down restarted"
                );
            }
            CircuitMode::Closed | CircuitMode::Open => {}
        }
    }

    /// A stale permit must not free the slot of a newer probe.
    fn release_probe(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.mode == CircuitMode::HalfOpen
            && state.probe_in_flight
            && state.probe_generation == generation
        {
            state.probe_in_flight = false;
            debug!(
                event_name = "engine.breaker.probe_released",
                breaker = %self.name,
                "probe ended without a verdict; slot released"
            );
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        let generation = state.probe_generation;
        *state = CircuitState { probe_generation: generation, ..CircuitState::default() };
        info!(event_name = "engine.breaker.reset", breaker = %self.name, "breaker reset");
    }

    fn cooldown_elapsed(&self, state: &CircuitState) -> bool {
        let Some(last_failure_at) = state.last_failure_at else {
            return true;
        };
        (self.clock.now() - last_failure_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.settings.cooldown)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker for every endpoint.
    #[default]
    Shared,
    PerEndpoint,
}

const SHARED_BREAKER: &str = "upstream";

/// Hands out the breaker that guards a given endpoint.
pub struct BreakerRegistry {
    scope: BreakerScope,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    shared: Arc<CircuitBreaker>,
    per_endpoint: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(scope: BreakerScope, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(CircuitBreaker::new(SHARED_BREAKER, settings, clock.clone()));
        Self { scope, settings, clock, shared, per_endpoint: Mutex::new(HashMap::new()) }
    }

    pub fn scope(&self) -> BreakerScope {
        self.scope
    }

    pub fn for_endpoint(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        match self.scope {
            BreakerScope::Shared => self.shared.clone(),
            BreakerScope::PerEndpoint => self
                .per_endpoint
                .lock()
                .entry(endpoint.to_owned())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(endpoint, self.settings, self.clock.clone()))
                })
                .clone(),
        }
    }

    pub fn snapshots(&self) -> BTreeMap<String, CircuitState> {
        match self.scope {
            BreakerScope::Shared => BTreeMap::from([(SHARED_BREAKER.to_owned(), self.shared.snapshot())]),
            BreakerScope::PerEndpoint => self
                .per_endpoint
                .lock()
                .iter()
                .map(|(endpoint, breaker)| (endpoint.clone(), breaker.snapshot()))
                .collect(),
        }
    }

    pub fn reset_all(&self) {
        self.shared.reset();
        for breaker in self.per_endpoint.lock().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::ManualClock;

    use super::{
        Admission, BreakerRegistry, BreakerScope, BreakerSettings, CircuitBreaker, CircuitMode,
    };

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerSettings { failure_threshold: 3, cooldown: Duration::from_secs(60) },
            clock,
        )
    }

    fn admission(breaker: &CircuitBreaker) -> Option<Admission> {
        breaker.try_acquire().map(|permit| permit.admission())
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let breaker = breaker(ManualClock::starting_now());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(admission(&breaker), Some(Admission::Normal));

        breaker.record_failure();
        assert_eq!(breaker.mode(), CircuitMode::Open);
        assert!(!breaker.admits());
        assert!(breaker.try_acquire().is_none());
    }

    #[test]
    fn success_while_closed_resets_counter() {
        let breaker = breaker(ManualClock::starting_now());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.snapshot().consecutive_failures, 1);
        assert_eq!(breaker.mode(), CircuitMode::Closed);
    }

    #[test]
    fn single_probe_after_cooldown_then_close_on_success() {
        let clock = ManualClock::starting_now();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }

        clock.advance(chrono::Duration::seconds(59));
        assert!(breaker.try_acquire().is_none());

        clock.advance(chrono::Duration::seconds(1));
        assert!(breaker.admits());
        let probe = breaker.try_acquire().expect("probe admitted after cool-down");
        assert_eq!(probe.admission(), Admission::Probe);
        assert!(breaker.try_acquire().is_none(), "concurrent callers are rejected while probing");

        probe.succeed();
        let state = breaker.snapshot();
        assert_eq!(state.mode, CircuitMode::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn failed_probe_reopens_and_restarts_cooldown() {
        let clock = ManualClock::starting_now();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(61));
        breaker.try_acquire().expect("probe admitted").fail();
        assert_eq!(breaker.mode(), CircuitMode::Open);

        clock.advance(chrono::Duration::seconds(30));
        assert!(breaker.try_acquire().is_none());
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(admission(&breaker), Some(Admission::Probe));
    }

    #[test]
    fn released_probe_can_be_claimed_again() {
        let clock = ManualClock::starting_now();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(60));

        breaker.try_acquire().expect("probe admitted").release();
        assert_eq!(breaker.mode(), CircuitMode::HalfOpen);
        assert_eq!(admission(&breaker), Some(Admission::Probe));
    }

    #[test]
    fn dropped_probe_does_not_wedge_half_open() {
        let clock = ManualClock::starting_now();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(60));

        let abandoned = breaker.try_acquire().expect("probe admitted");
        assert!(!breaker.admits());
        drop(abandoned);

        assert!(breaker.admits());
        breaker.try_acquire().expect("slot freed by the dropped probe").succeed();
        assert_eq!(breaker.mode(), CircuitMode::Closed);
    }

    #[test]
    fn stale_permit_leaves_newer_probe_in_place() {
        let clock = ManualClock::starting_now();
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(60));

        let first = breaker.try_acquire().expect("first probe");
        breaker.reset();
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(chrono::Duration::seconds(60));
        let second = breaker.try_acquire().expect("second probe");

        drop(first);
        assert!(breaker.try_acquire().is_none(), "second probe still owns the slot");
        second.succeed();
        assert_eq!(breaker.mode(), CircuitMode::Closed);
    }

    #[test]
    fn registry_scopes_and_reset() {
        let clock = ManualClock::starting_now();
        let settings = BreakerSettings { failure_threshold: 1, cooldown: Duration::from_secs(60) };

        let shared = BreakerRegistry::new(BreakerScope::Shared, settings, clock.clone());
        assert!(Arc::ptr_eq(&shared.for_endpoint("fixtures"), &shared.for_endpoint("standings")));

        let per_endpoint = BreakerRegistry::new(BreakerScope::PerEndpoint, settings, clock);
        per_endpoint.for_endpoint("fixtures").record_failure();
        assert_eq!(per_endpoint.for_endpoint("fixtures").mode(), CircuitMode::Open);
        assert_eq!(per_endpoint.for_endpoint("standings").mode(), CircuitMode::Closed);
        assert_eq!(per_endpoint.snapshots().len(), 2);

        per_endpoint.reset_all();
        assert_eq!(per_endpoint.for_endpoint("fixtures").mode(), CircuitMode::Closed);
    }
}
