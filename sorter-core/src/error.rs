use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SorterError {
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("Actuation failed: {0}")]
    ActuationFailed(String),

    #[error("Timeout: {operation} did not complete within {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Unknown position: {0}")]
    UnknownPosition(String),

    #[error("Sensor read error: {0}")]
    SensorReadError(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Faulted: {0}")]
    Faulted(String),

    #[error("Invalid detection: {0}")]
    InvalidDetection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SorterError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        SorterError::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Errors that leave the physical rig in a known state. Everything else
    /// escalates the engine to `Faulted`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SorterError::CaptureFailed(_)
                | SorterError::InferenceUnavailable(_)
                | SorterError::SensorReadError(_)
                | SorterError::Busy(_)
        )
    }

    /// Stable short name, used in status text and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SorterError::CaptureFailed(_) => "capture_failed",
            SorterError::InferenceUnavailable(_) => "inference_unavailable",
            SorterError::ActuationFailed(_) => "actuation_failed",
            SorterError::Timeout { .. } => "timeout",
            SorterError::UnknownPosition(_) => "unknown_position",
            SorterError::SensorReadError(_) => "sensor_read_error",
            SorterError::Busy(_) => "busy",
            SorterError::Faulted(_) => "faulted",
            SorterError::InvalidDetection(_) => "invalid_detection",
            SorterError::Configuration(_) => "configuration",
            SorterError::Serialization(_) => "serialization",
            SorterError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for SorterError {
    fn from(err: serde_json::Error) -> Self {
        SorterError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for SorterError {
    fn from(err: config::ConfigError) -> Self {
        SorterError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SorterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = SorterError::timeout("move_conveyor", Duration::from_millis(2500));
        assert_eq!(
            err.to_string(),
            "Timeout: move_conveyor did not complete within 2500ms"
        );
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SorterError::CaptureFailed("no frame".into()).is_recoverable());
        assert!(SorterError::InferenceUnavailable("no model".into()).is_recoverable());
        assert!(SorterError::SensorReadError("gpio".into()).is_recoverable());

        assert!(!SorterError::ActuationFailed("servo".into()).is_recoverable());
        assert!(!SorterError::UnknownPosition("zone_defect_9".into()).is_recoverable());
        assert!(!SorterError::timeout("move_arm_to", Duration::from_secs(5)).is_recoverable());
    }

    #[test]
    fn test_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "value");
        let err: SorterError = io_err.into();
        match err {
            SorterError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }
}
