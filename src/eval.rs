use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use log::{debug, warn};
use serde::Serialize;

use crate::config::FlightCollisionPolicy;
use crate::context::RequestContext;
use crate::customer_id::{CustomerIdProvider, DefaultCustomerIdProvider};
use crate::error::FlightError;
use crate::filter::{Filter, FilterContext, FilterKind, ParentSettings};
use crate::gate::{Gate, GateId};
use crate::ip_range::{EmptyIpRangeProvider, IpRangeProvider};
use crate::overrides::{OverrideKind, QueryOverrides};
use crate::store::Store;
use crate::util::normalize_key;

/// A diagnostic signal raised while evaluating gates. Evaluation never fails because of these;
/// they exist so misconfiguration can be noticed.
#[derive(Clone, Debug, PartialEq)]
pub enum DiagnosticEvent {
    /// A parent filter (directly or through containers) led back to a gate that was still being
    /// evaluated. The reference was treated as inactive.
    CycleDetected { gate: String },
    /// A flight shared its name with a configured gate.
    FlightCollision { flight: String, accepted: bool },
    /// The flight source failed, timed out or was cancelled; no flights were merged.
    FlightFetchFailed { error: FlightError },
}

/// Trait used by evaluation to report [DiagnosticEvent]s.
pub trait DiagnosticRecorder: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// The collaborators and settings that evaluation consults besides the store and the request.
pub struct EvaluationOptions<'a> {
    pub ip_ranges: &'a dyn IpRangeProvider,
    pub customer_ids: &'a dyn CustomerIdProvider,
    /// Environment assumed when the request does not name one.
    pub default_environment: Option<&'a str>,
    /// Whether the client address may be taken from the `X-Forwarded-For` chain.
    pub trust_forwarded_for: bool,
    pub recorder: Option<&'a dyn DiagnosticRecorder>,
}

impl<'a> Default for EvaluationOptions<'a> {
    fn default() -> Self {
        EvaluationOptions {
            ip_ranges: &EmptyIpRangeProvider,
            customer_ids: &DefaultCustomerIdProvider,
            default_environment: None,
            trust_forwarded_for: true,
            recorder: None,
        }
    }
}

const PREALLOCATED_GATE_STATES: usize = 32;

#[derive(Clone, Debug)]
enum GateState {
    InProgress,
    Done(Detail),
}

/// Per-request evaluation state: which gates are being evaluated and which are decided.
///
/// A gate absent from the map has not been visited yet.
pub(crate) struct EvaluationStack {
    states: HashMap<GateId, GateState>,
}

impl EvaluationStack {
    fn new() -> Self {
        Self {
            states: HashMap::with_capacity(PREALLOCATED_GATE_STATES),
        }
    }

    #[cfg(test)]
    fn in_progress(&self) -> usize {
        self.states
            .values()
            .filter(|state| matches!(state, GateState::InProgress))
            .count()
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Request-wide inputs, resolved once and shared by every gate of one evaluation.
struct Scope<'a> {
    store: &'a dyn Store,
    request: &'a RequestContext,
    options: &'a EvaluationOptions<'a>,
    customer_id: Option<String>,
    client_ip: Option<IpAddr>,
    environment: Option<&'a str>,
}

impl<'a> Scope<'a> {
    fn new(
        store: &'a dyn Store,
        request: &'a RequestContext,
        options: &'a EvaluationOptions<'a>,
    ) -> Self {
        Scope {
            store,
            request,
            options,
            customer_id: options.customer_ids.customer_id(request),
            client_ip: request.client_ip(options.trust_forwarded_for),
            environment: request.environment().or(options.default_environment),
        }
    }

    fn filter_context<'s>(&'s self, gate: &'s Gate) -> FilterContext<'s> {
        FilterContext {
            request: self.request,
            gate_name: gate.name(),
            customer_id: self.customer_id.as_deref(),
            client_ip: self.client_ip,
            environment: self.environment,
            ip_ranges: self.options.ip_ranges,
        }
    }

    fn record(&self, event: DiagnosticEvent) {
        if let Some(recorder) = self.options.recorder {
            recorder.record(event);
        }
    }
}

/// Evaluate a single gate for the specified [RequestContext], with query overrides applied.
///
/// A gate that is not in the store is inactive; that is a normal outcome, not an error.
pub fn evaluate_gate(
    store: &dyn Store,
    gate_name: &str,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> Detail {
    let scope = Scope::new(store, context, options);
    let mut evaluation_stack = EvaluationStack::default();
    let detail = evaluate_by_name(&scope, gate_name, &mut evaluation_stack);
    apply_override(context.overrides(), gate_name, detail)
}

/// Returns only the decision of [evaluate_gate].
pub fn is_gate_active(
    store: &dyn Store,
    gate_name: &str,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> bool {
    evaluate_gate(store, gate_name, context, options).value
}

/// Evaluate only the named gates (and whatever they depend on). Names missing from the store
/// appear in the result as inactive.
pub fn evaluate_gates<'n, I>(
    store: &dyn Store,
    gate_names: I,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> EvaluationResult
where
    I: IntoIterator<Item = &'n str>,
{
    let scope = Scope::new(store, context, options);
    let mut evaluation_stack = EvaluationStack::default();
    let mut result = EvaluationResult::default();
    for name in gate_names {
        let (name, detail) = match store.gate(name) {
            Some(gate) => (
                gate.name(),
                evaluate_internal(&scope, gate, &mut evaluation_stack),
            ),
            None => (name, Detail::err(Error::GateNotFound)),
        };
        result.insert(name, detail);
    }
    apply_overrides(store, context.overrides(), &mut result);
    result
}

/// Evaluate every gate in the store.
pub fn evaluate_all(
    store: &dyn Store,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> EvaluationResult {
    let mut result = evaluate_all_computed(store, context, options);
    apply_overrides(store, context.overrides(), &mut result);
    result
}

/// Every gate's computed decision, before query overrides are layered on.
pub(crate) fn evaluate_all_computed(
    store: &dyn Store,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> EvaluationResult {
    let scope = Scope::new(store, context, options);
    let mut evaluation_stack = EvaluationStack::default();
    let mut result = EvaluationResult::default();
    for id in 0..store.gate_count() {
        if let Some(gate) = store.gate_by_id(id) {
            let detail = evaluate_internal(&scope, gate, &mut evaluation_stack);
            result.insert(gate.name(), detail);
        }
    }
    result
}

/// The decision for every gate in id order, with query overrides applied. Unlike
/// [evaluate_all] this includes gates shadowed by a shallower gate of the same name.
pub(crate) fn evaluate_each(
    store: &dyn Store,
    context: &RequestContext,
    options: &EvaluationOptions,
) -> Vec<Detail> {
    let scope = Scope::new(store, context, options);
    let mut evaluation_stack = EvaluationStack::default();
    let mut details = Vec::with_capacity(store.gate_count());
    for id in 0..store.gate_count() {
        if let Some(gate) = store.gate_by_id(id) {
            let detail = evaluate_internal(&scope, gate, &mut evaluation_stack);
            details.push(apply_override(context.overrides(), gate.name(), detail));
        }
    }
    details
}

fn evaluate_by_name(
    scope: &Scope,
    gate_name: &str,
    evaluation_stack: &mut EvaluationStack,
) -> Detail {
    match scope.store.gate(gate_name) {
        Some(gate) => evaluate_internal(scope, gate, evaluation_stack),
        None => Detail::err(Error::GateNotFound),
    }
}

fn evaluate_internal(scope: &Scope, gate: &Gate, evaluation_stack: &mut EvaluationStack) -> Detail {
    match evaluation_stack.states.get(&gate.id()) {
        Some(GateState::Done(detail)) => return detail.clone(),
        Some(GateState::InProgress) => {
            warn!(
                "parent relationship to gate '{}' caused a circular reference; treating it as inactive",
                gate.path()
            );
            scope.record(DiagnosticEvent::CycleDetected {
                gate: gate.name().to_string(),
            });
            return Detail::err(Error::CycleDetected);
        }
        None => (),
    }

    evaluation_stack
        .states
        .insert(gate.id(), GateState::InProgress);

    let detail = resolve(scope, gate, evaluation_stack);

    evaluation_stack
        .states
        .insert(gate.id(), GateState::Done(detail.clone()));
    detail
}

fn resolve(scope: &Scope, gate: &Gate, evaluation_stack: &mut EvaluationStack) -> Detail {
    if let Some(container_id) = gate.container() {
        let container = match scope.store.gate_by_id(container_id) {
            Some(container) => container,
            None => return Detail::err(Error::GateNotFound),
        };
        if !evaluate_internal(scope, container, evaluation_stack).value {
            return Detail {
                value: false,
                reason: Reason::ContainerInactive {
                    container: container.name().to_string(),
                },
            };
        }
    }

    let filter_context = scope.filter_context(gate);
    for (filter_index, filter) in gate.filters().iter().enumerate() {
        let passed = match filter {
            Filter::Campaign(settings) => settings.evaluate(&filter_context),
            Filter::Environment(settings) => settings.evaluate(&filter_context),
            Filter::IpAddress(settings) => settings.evaluate(&filter_context),
            Filter::Parent(settings) => parent_is_active(scope, settings, evaluation_stack),
            Filter::Rollout(settings) => settings.evaluate(&filter_context),
        };
        if !passed {
            return Detail {
                value: false,
                reason: Reason::FilterFailed {
                    filter_index,
                    filter_kind: filter.kind(),
                },
            };
        }
    }

    Detail {
        value: true,
        reason: Reason::FiltersPassed,
    }
}

fn parent_is_active(
    scope: &Scope,
    settings: &ParentSettings,
    evaluation_stack: &mut EvaluationStack,
) -> bool {
    match scope.store.gate(&settings.gate) {
        Some(parent) => evaluate_internal(scope, parent, evaluation_stack).value,
        None => {
            debug!("parent gate '{}' does not exist", settings.gate);
            false
        }
    }
}

fn apply_override(overrides: &QueryOverrides, gate_name: &str, detail: Detail) -> Detail {
    if overrides.is_empty() || detail.is_not_found() {
        return detail;
    }
    overrides.apply(gate_name, detail)
}

fn apply_overrides(store: &dyn Store, overrides: &QueryOverrides, result: &mut EvaluationResult) {
    if overrides.is_empty() {
        return;
    }
    for name in overrides.names() {
        if store.gate(name).is_none() && result.flight(name).is_none() {
            debug!("ignoring override for unknown gate '{}'", name);
        }
    }
    for (name, detail) in result.gates.iter_mut() {
        *detail = apply_override(overrides, name, detail.clone());
    }
    // Flights are active by definition, so an override can only switch one off.
    result.flights.retain(|flight, _| {
        let active = overrides.apply(flight, Detail::flight()).value;
        if !active {
            debug!("flight '{}' switched off by query override", flight);
        }
        active
    });
}

/// The decisions of one evaluation pass: configured gates by name, plus flights from the
/// experiment source in their own namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvaluationResult {
    gates: BTreeMap<String, Detail>,
    flights: BTreeMap<String, String>,
    #[serde(skip)]
    names: HashMap<String, String>,
}

impl EvaluationResult {
    fn insert(&mut self, name: &str, detail: Detail) {
        let key = normalize_key(name);
        if self.names.contains_key(&key) {
            return;
        }
        self.names.insert(key, name.to_string());
        self.gates.insert(name.to_string(), detail);
    }

    /// The detailed decision for a configured gate, looked up ignoring case.
    pub fn get(&self, gate_name: &str) -> Option<&Detail> {
        self.names
            .get(&normalize_key(gate_name))
            .and_then(|name| self.gates.get(name))
    }

    /// True if `name` is an active gate or a merged flight.
    pub fn is_active(&self, name: &str) -> bool {
        match self.get(name) {
            Some(detail) => detail.value,
            None => self.flight(name).is_some(),
        }
    }

    /// The value of a merged flight, looked up ignoring case.
    pub fn flight(&self, name: &str) -> Option<&str> {
        let key = normalize_key(name);
        self.flights
            .iter()
            .find(|(flight, _)| normalize_key(flight) == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn gates(&self) -> &BTreeMap<String, Detail> {
        &self.gates
    }

    pub fn flights(&self) -> &BTreeMap<String, String> {
        &self.flights
    }

    /// Names of the active gates and merged flights, gates first.
    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.gates
            .iter()
            .filter(|(_, detail)| detail.value)
            .map(|(name, _)| name.as_str())
            .chain(self.flights.keys().map(String::as_str))
    }

    /// Merges flights into the result. Flights are always active. A flight named like a
    /// configured gate is resolved by `policy`.
    pub fn merge_flights(
        &mut self,
        flights: HashMap<String, String>,
        policy: FlightCollisionPolicy,
        recorder: Option<&dyn DiagnosticRecorder>,
    ) {
        let mut flights: Vec<(String, String)> = flights.into_iter().collect();
        flights.sort();
        for (flight, value) in flights {
            let gate_name = self.names.get(&normalize_key(&flight)).cloned();
            if let Some(gate_name) = gate_name {
                let accepted = policy == FlightCollisionPolicy::LastWriterWins;
                if accepted {
                    self.gates.insert(gate_name, Detail::flight());
                } else {
                    warn!(
                        "flight '{}' collides with a configured gate and was ignored",
                        flight
                    );
                }
                if let Some(recorder) = recorder {
                    recorder.record(DiagnosticEvent::FlightCollision {
                        flight: flight.clone(),
                        accepted,
                    });
                }
                if !accepted {
                    continue;
                }
            }
            self.flights.insert(flight, value);
        }
    }

    /// Layers query overrides on top of the computed (and flight-merged) decisions.
    pub(crate) fn apply_overrides(&mut self, store: &dyn Store, overrides: &QueryOverrides) {
        apply_overrides(store, overrides, self);
    }
}

/// A Detail is the decision for one gate together with the reason it was reached.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detail {
    pub value: bool,
    pub reason: Reason,
}

impl Detail {
    /// Returns an inactive detail carrying the provided error as its reason.
    pub fn err(error: Error) -> Detail {
        Detail {
            value: false,
            reason: Reason::Error { error },
        }
    }

    fn flight() -> Detail {
        Detail {
            value: true,
            reason: Reason::Flight,
        }
    }

    fn is_not_found(&self) -> bool {
        matches!(
            self.reason,
            Reason::Error {
                error: Error::GateNotFound
            }
        )
    }
}

/// Reason describes why a gate evaluation produced a particular decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// Every filter passed, or the gate has none.
    FiltersPassed,
    /// The filter at `filter_index` did not pass.
    #[serde(rename_all = "camelCase")]
    FilterFailed {
        filter_index: usize,
        filter_kind: FilterKind,
    },
    /// The gate this one is nested in is inactive.
    #[serde(rename_all = "camelCase")]
    ContainerInactive { container: String },
    /// A query-string override decided the gate.
    Overridden {
        #[serde(rename = "overrideKind")]
        kind: OverrideKind,
    },
    /// A flight with the same name forced the gate on.
    Flight,
    /// The gate could not be evaluated normally; it is inactive.
    Error {
        #[serde(rename = "errorKind")]
        error: Error,
    },
}

/// Error is returned via a [Reason::Error] when a gate could not be evaluated normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Error {
    /// No gate with the requested name exists.
    GateNotFound,
    /// The gate was reached again while it was still being evaluated.
    CycleDetected,
}
