use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EvaluatorConfig;
use crate::context::RequestContext;
use crate::customer_id::{CustomerIdProvider, DefaultCustomerIdProvider};
use crate::eval::{self, Detail, DiagnosticRecorder, EvaluationOptions, EvaluationResult, Reason};
use crate::flight::{fetch_flights_recorded, FlightFilters, FlightManager, NoopFlightManager};
use crate::gate_store::GateStore;
use crate::ip_range::{EmptyIpRangeProvider, IpRangeProvider};

/// GateEvaluator answers gate questions for requests against the snapshot currently published
/// by a [GateStore].
///
/// Each call takes its own snapshot, so a reload never changes the answers of an evaluation that
/// is already running.
pub struct GateEvaluator {
    store: Arc<GateStore>,
    config: EvaluatorConfig,
    ip_ranges: Arc<dyn IpRangeProvider>,
    customer_ids: Arc<dyn CustomerIdProvider>,
    flights: Arc<dyn FlightManager>,
    recorder: Option<Arc<dyn DiagnosticRecorder>>,
}

impl GateEvaluator {
    pub fn new(store: Arc<GateStore>, config: EvaluatorConfig) -> Self {
        GateEvaluator {
            store,
            config,
            ip_ranges: Arc::new(EmptyIpRangeProvider),
            customer_ids: Arc::new(DefaultCustomerIdProvider),
            flights: Arc::new(NoopFlightManager),
            recorder: None,
        }
    }

    pub fn with_ip_ranges(mut self, ip_ranges: impl IpRangeProvider + 'static) -> Self {
        self.ip_ranges = Arc::new(ip_ranges);
        self
    }

    pub fn with_customer_ids(mut self, customer_ids: impl CustomerIdProvider + 'static) -> Self {
        self.customer_ids = Arc::new(customer_ids);
        self
    }

    pub fn with_flight_manager(mut self, flights: impl FlightManager + 'static) -> Self {
        self.flights = Arc::new(flights);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn DiagnosticRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn store(&self) -> &GateStore {
        &self.store
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    fn options(&self) -> EvaluationOptions<'_> {
        EvaluationOptions {
            ip_ranges: self.ip_ranges.as_ref(),
            customer_ids: self.customer_ids.as_ref(),
            default_environment: self.config.default_environment.as_deref(),
            trust_forwarded_for: self.config.trust_forwarded_for,
            recorder: self.recorder.as_deref(),
        }
    }

    pub fn is_gate_active(&self, gate_name: &str, context: &RequestContext) -> bool {
        self.evaluate_gate(gate_name, context).value
    }

    pub fn evaluate_gate(&self, gate_name: &str, context: &RequestContext) -> Detail {
        let snapshot = self.store.snapshot();
        eval::evaluate_gate(snapshot.as_ref(), gate_name, context, &self.options())
    }

    pub fn evaluate_gates<'n, I>(&self, gate_names: I, context: &RequestContext) -> EvaluationResult
    where
        I: IntoIterator<Item = &'n str>,
    {
        let snapshot = self.store.snapshot();
        eval::evaluate_gates(snapshot.as_ref(), gate_names, context, &self.options())
    }

    pub fn evaluate_all(&self, context: &RequestContext) -> EvaluationResult {
        let snapshot = self.store.snapshot();
        eval::evaluate_all(snapshot.as_ref(), context, &self.options())
    }

    /// Evaluates every gate and merges in the flights assigned by the flight manager.
    ///
    /// The flight fetch is bounded by the configured timeout and by `cancelled`; if either fires
    /// first, or the manager fails, the result simply has no flights. Query overrides are
    /// applied after the merge.
    pub async fn evaluate_all_with_flights<C>(
        &self,
        context: &RequestContext,
        cancelled: C,
    ) -> EvaluationResult
    where
        C: Future<Output = ()>,
    {
        let options = self.options();
        let filters = FlightFilters::from_context(
            context,
            self.customer_ids.customer_id(context),
            options.default_environment,
        );
        let flights = fetch_flights_recorded(
            self.flights.as_ref(),
            &filters,
            self.config.flight_timeout,
            cancelled,
            options.recorder,
        )
        .await;

        let snapshot = self.store.snapshot();
        let mut result = eval::evaluate_all_computed(snapshot.as_ref(), context, &options);
        result.merge_flights(
            flights,
            self.config.flight_collision_policy,
            options.recorder,
        );
        result.apply_overrides(snapshot.as_ref(), context.overrides());
        result
    }

    /// Every gate of the current snapshot in breadth-first order with its decision for
    /// `context`.
    pub fn list_gates(&self, context: &RequestContext) -> GateListing {
        let snapshot = self.store.snapshot();
        let details = eval::evaluate_each(snapshot.as_ref(), context, &self.options());
        let gates = snapshot
            .gates()
            .zip(details)
            .map(|(gate, detail)| GateListingEntry {
                name: gate.name().to_string(),
                path: gate.path().to_string(),
                group: gate.group().map(str::to_string),
                active: detail.value,
                reason: detail.reason,
            })
            .collect();

        GateListing {
            version: snapshot.version(),
            loaded_at: snapshot.loaded_at(),
            gates,
        }
    }
}

/// A diagnostic view of one snapshot, serializable to JSON.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateListing {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub gates: Vec<GateListingEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateListingEntry {
    pub name: String,
    pub path: String,
    pub group: Option<String>,
    pub active: bool,
    pub reason: Reason,
}
