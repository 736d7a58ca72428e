use std::path::PathBuf;

use thiserror::Error;

/// ConfigurationError is returned when a gate hierarchy document cannot be turned into a
/// snapshot. It is fatal for an initial load; a failed reload leaves the previous snapshot in
/// place.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The document is not valid JSON or does not have the expected shape.
    #[error("malformed gate document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document could not be read from disk.
    #[error("could not read gate document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two sibling gates share a name once case is ignored.
    #[error("duplicate gate name '{name}' at '{path}'")]
    DuplicateGate { name: String, path: String },

    /// A gate name is empty or uses characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid gate name '{name}' at '{path}'")]
    InvalidGateName { name: String, path: String },

    /// A rollout filter asks for more than 100% exposure.
    #[error("rollout exposure {percentage} is out of range (0-100) for gate '{path}'")]
    InvalidExposure { path: String, percentage: u32 },
}

/// FlightError describes why the experiment source did not produce flights. It never escapes an
/// evaluation: [crate::fetch_flights] turns every variant into an empty flight set.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FlightError {
    #[error("flight fetch timed out")]
    Timeout,
    #[error("flight fetch was cancelled")]
    Cancelled,
    #[error("flight fetch failed: {0}")]
    Fetch(String),
}

/// IpRangeParseError is returned for range strings that are neither an address nor CIDR
/// notation.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("invalid IP range '{input}': {message}")]
pub struct IpRangeParseError {
    pub input: String,
    pub message: &'static str,
}
