use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::FlightError;
use crate::eval::{DiagnosticEvent, DiagnosticRecorder};

/// Flight name to flight value, as returned by a [FlightManager].
pub type Flights = HashMap<String, String>;

/// The request attributes an experiment source assigns flights by.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightFilters {
    pub market: Option<String>,
    pub environment: Option<String>,
    pub partner: Option<String>,
    pub platform: Option<String>,
    pub customer_id: Option<String>,
}

impl FlightFilters {
    /// Collects the filters from a request. The customer id is passed separately because it
    /// comes from the configured [crate::CustomerIdProvider], not necessarily from the request.
    /// `default_environment` stands in when the request names no environment.
    pub fn from_context(
        context: &RequestContext,
        customer_id: Option<String>,
        default_environment: Option<&str>,
    ) -> Self {
        FlightFilters {
            market: context.market().map(str::to_string),
            environment: context
                .environment()
                .or(default_environment)
                .map(str::to_string),
            partner: context.partner().map(str::to_string),
            platform: context.platform().map(str::to_string),
            customer_id,
        }
    }
}

/// An external experimentation service that assigns flights to a request.
#[async_trait]
pub trait FlightManager: Send + Sync {
    async fn get_flights(&self, filters: &FlightFilters) -> Result<Flights, FlightError>;
}

/// A [FlightManager] that never assigns any flight.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFlightManager;

#[async_trait]
impl FlightManager for NoopFlightManager {
    async fn get_flights(&self, _filters: &FlightFilters) -> Result<Flights, FlightError> {
        Ok(Flights::new())
    }
}

/// Asks `manager` for flights, giving up after `timeout` or as soon as `cancelled` completes.
///
/// Failures never propagate: a timeout, a cancellation or an error from the manager is logged
/// and results in no flights.
pub async fn fetch_flights<C>(
    manager: &dyn FlightManager,
    filters: &FlightFilters,
    timeout: Duration,
    cancelled: C,
) -> Flights
where
    C: Future<Output = ()>,
{
    fetch_flights_recorded(manager, filters, timeout, cancelled, None).await
}

pub(crate) async fn fetch_flights_recorded<C>(
    manager: &dyn FlightManager,
    filters: &FlightFilters,
    timeout: Duration,
    cancelled: C,
    recorder: Option<&dyn DiagnosticRecorder>,
) -> Flights
where
    C: Future<Output = ()>,
{
    match try_fetch_flights(manager, filters, timeout, cancelled).await {
        Ok(flights) => flights,
        Err(error) => {
            warn!("continuing without flights: {}", error);
            if let Some(recorder) = recorder {
                recorder.record(DiagnosticEvent::FlightFetchFailed { error });
            }
            Flights::new()
        }
    }
}

async fn try_fetch_flights<C>(
    manager: &dyn FlightManager,
    filters: &FlightFilters,
    timeout: Duration,
    cancelled: C,
) -> Result<Flights, FlightError>
where
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancelled => Err(FlightError::Cancelled),
        result = tokio::time::timeout(timeout, manager.get_flights(filters)) => match result {
            Ok(flights) => flights,
            Err(_) => Err(FlightError::Timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::InMemoryDiagnosticRecorder;
    use maplit::hashmap;
    use spectral::prelude::*;
    use std::future::pending;

    struct FixedFlightManager(Result<Flights, FlightError>);

    #[async_trait]
    impl FlightManager for FixedFlightManager {
        async fn get_flights(&self, _filters: &FlightFilters) -> Result<Flights, FlightError> {
            self.0.clone()
        }
    }

    struct SlowFlightManager;

    #[async_trait]
    impl FlightManager for SlowFlightManager {
        async fn get_flights(&self, _filters: &FlightFilters) -> Result<Flights, FlightError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(hashmap! { "late".to_string() => "1".to_string() })
        }
    }

    struct EchoFlightManager;

    #[async_trait]
    impl FlightManager for EchoFlightManager {
        async fn get_flights(&self, filters: &FlightFilters) -> Result<Flights, FlightError> {
            let market = filters.market.clone().unwrap_or_default();
            Ok(hashmap! { format!("market-{}", market) => "on".to_string() })
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn filters_come_from_the_request() {
        let context = RequestContext::builder()
            .market("en-us")
            .environment("Prod")
            .partner("contoso")
            .platform("ios")
            .customer_id("ignored")
            .build();
        let filters = FlightFilters::from_context(&context, Some("cust".to_string()), Some("Dev"));
        assert_that!(filters).is_equal_to(FlightFilters {
            market: Some("en-us".to_string()),
            environment: Some("Prod".to_string()),
            partner: Some("contoso".to_string()),
            platform: Some("ios".to_string()),
            customer_id: Some("cust".to_string()),
        });
    }

    #[test]
    fn default_environment_fills_missing_environment() {
        let context = RequestContext::builder().market("en-us").build();
        let filters = FlightFilters::from_context(&context, None, Some("Prod"));
        assert_that!(filters.environment).contains_value("Prod".to_string());

        let filters = FlightFilters::from_context(&context, None, None);
        assert_that!(filters.environment).is_none();
    }

    #[tokio::test]
    async fn noop_manager_has_no_flights() {
        let flights = fetch_flights(
            &NoopFlightManager,
            &FlightFilters::default(),
            TIMEOUT,
            pending::<()>(),
        )
        .await;
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn returns_flights_from_the_manager() {
        let filters = FlightFilters {
            market: Some("fr-fr".to_string()),
            ..FlightFilters::default()
        };
        let flights = fetch_flights(&EchoFlightManager, &filters, TIMEOUT, pending::<()>()).await;
        assert_that!(flights).is_equal_to(hashmap! {
            "market-fr-fr".to_string() => "on".to_string(),
        });
    }

    #[tokio::test]
    async fn timeout_degrades_to_no_flights() {
        let recorder = InMemoryDiagnosticRecorder::new();
        let flights = fetch_flights_recorded(
            &SlowFlightManager,
            &FlightFilters::default(),
            TIMEOUT,
            pending::<()>(),
            Some(&recorder),
        )
        .await;
        assert!(flights.is_empty());
        assert_that!(recorder.events()).is_equal_to(vec![DiagnosticEvent::FlightFetchFailed {
            error: FlightError::Timeout,
        }]);
    }

    #[tokio::test]
    async fn cancellation_degrades_to_no_flights() {
        let recorder = InMemoryDiagnosticRecorder::new();
        let flights = fetch_flights_recorded(
            &SlowFlightManager,
            &FlightFilters::default(),
            Duration::from_secs(60),
            async {},
            Some(&recorder),
        )
        .await;
        assert!(flights.is_empty());
        assert_that!(recorder.events()).is_equal_to(vec![DiagnosticEvent::FlightFetchFailed {
            error: FlightError::Cancelled,
        }]);
    }

    #[tokio::test]
    async fn manager_error_degrades_to_no_flights() {
        let manager = FixedFlightManager(Err(FlightError::Fetch("503".to_string())));
        let flights = fetch_flights(
            &manager,
            &FlightFilters::default(),
            TIMEOUT,
            pending::<()>(),
        )
        .await;
        assert!(flights.is_empty());
    }
}
