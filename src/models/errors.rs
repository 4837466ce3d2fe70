use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EventError {
    #[error("Missing required field in event: {field}")]
    MissingField { field: &'static str },
    #[error("Event has no data entries")]
    EmptyData,
    #[error("Invalid block timestamp: {got}")]
    InvalidTimestamp { got: String },
    #[error("Invalid event shape: {reason}")]
    InvalidShape { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid stream endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Timeline max_len must be greater than zero")]
    ZeroTimelineCapacity,
}
