use thiserror::Error;

/// Failures surfaced through the query interface.
///
/// Per-message classification errors are logged by the dispatcher and never
/// terminate the aggregation loop; only `TransportUnavailable` is fatal to the
/// telemetry subsystem as a whole.
#[derive(Debug, Error)]
pub enum HubError {
    /// The queried vehicle key has never been observed on the link.
    #[error("vehicle has not been observed on the link")]
    UnknownVehicle,

    /// A status-colour parameter report carried a value outside the table.
    #[error("status colour parameter has no mapping for value {value}")]
    MalformedParameterValue { value: i32 },

    /// The link transport could not be reached or is not running.
    #[error("link transport is unavailable")]
    TransportUnavailable,

    /// A mission request/response step exhausted its retry budget.
    #[error("mission retrieval stalled: target did not respond")]
    MissionRetrievalStalled,
}
