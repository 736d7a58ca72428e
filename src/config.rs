use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

const DEFAULT_FLIGHT_TIMEOUT: Duration = Duration::from_millis(500);

/// How a flight whose name matches a configured gate is merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlightCollisionPolicy {
    /// The flight is dropped and the gate keeps its computed decision.
    #[default]
    Reject,
    /// The flight wins: the gate is reported active with [crate::Reason::Flight].
    LastWriterWins,
}

/// Settings for a [crate::GateEvaluator].
///
/// ```json
/// { "defaultEnvironment": "Prod", "trustForwardedFor": false, "flightTimeoutMs": 250 }
/// ```
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    /// Environment used by environment filters when the request does not name one.
    pub default_environment: Option<String>,
    pub trust_forwarded_for: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "flightTimeoutMs")]
    pub flight_timeout: Duration,
    pub flight_collision_policy: FlightCollisionPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            default_environment: None,
            trust_forwarded_for: true,
            flight_timeout: DEFAULT_FLIGHT_TIMEOUT,
            flight_collision_policy: FlightCollisionPolicy::default(),
        }
    }
}

impl EvaluatorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
