//! Event and command contract spoken to external observers
//!
//! Outbound messages are JSON objects tagged by `type`:
//! `log`, `detection_result`, `status` and `frame`. Inbound messages are
//! `{"type": "command", "action": "<start|stop|manual_conveyor|manual_arm_home|reset>"}`.

use crate::error::{Result, SorterError};
use crate::types::{ControlCommand, CycleOutcome, EngineState, FrameTag, StatusClass, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SorterEvent {
    /// Human-readable progress line
    Log { message: String },
    /// Result of one inspection
    DetectionResult {
        verdict: Verdict,
        defect_labels: String,
    },
    /// Engine status change
    Status { state: String, class: StatusClass },
    /// Encoded frame, base64 JPEG
    Frame { tag: FrameTag, encoded_image: String },
}

impl SorterEvent {
    pub fn log(message: impl Into<String>) -> Self {
        SorterEvent::Log {
            message: message.into(),
        }
    }

    pub fn detection(outcome: &CycleOutcome) -> Self {
        SorterEvent::DetectionResult {
            verdict: outcome.verdict,
            defect_labels: outcome.labels_text(),
        }
    }

    pub fn status(state: impl Into<String>, class: StatusClass) -> Self {
        SorterEvent::Status {
            state: state.into(),
            class,
        }
    }

    /// Status event describing an engine state
    pub fn engine_status(state: EngineState) -> Self {
        Self::status(state.to_string(), state.status_class())
    }

    pub fn frame(tag: FrameTag, encoded_image: String) -> Self {
        SorterEvent::Frame { tag, encoded_image }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SorterEvent::Log { .. } => "log",
            SorterEvent::DetectionResult { .. } => "detection_result",
            SorterEvent::Status { .. } => "status",
            SorterEvent::Frame { .. } => "frame",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    action: String,
}

/// Parse an inbound observer message into a command.
pub fn parse_command(text: &str) -> Result<ControlCommand> {
    let message: InboundMessage = serde_json::from_str(text)?;
    match message.kind.as_deref() {
        None | Some("command") => message.action.parse(),
        Some(other) => Err(SorterError::Serialization(format!(
            "unsupported message type '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_wire_shape() {
        let json = SorterEvent::log("Object detected").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["message"], "Object detected");

        let event = SorterEvent::engine_status(EngineState::WaitingForTrigger);
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "WaitingForTrigger");
        assert_eq!(value["class"], "running");
    }

    #[test]
    fn test_detection_event() {
        let outcome = CycleOutcome::from_detections(&[]);
        let value: Value =
            serde_json::from_str(&SorterEvent::detection(&outcome).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "detection_result");
        assert_eq!(value["verdict"], "Pass");
        assert_eq!(value["defect_labels"], "none");
    }

    #[test]
    fn test_frame_event() {
        let event = SorterEvent::frame(FrameTag::Annotated, "AAAA".to_string());
        assert_eq!(event.event_type(), "frame");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["tag"], "annotated");
        assert_eq!(value["encoded_image"], "AAAA");
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command(r#"{"type":"command","action":"start"}"#).unwrap(),
            ControlCommand::Start
        );
        assert_eq!(
            parse_command(r#"{"action":"manual_arm_home"}"#).unwrap(),
            ControlCommand::ManualArmHome
        );
        assert!(parse_command(r#"{"type":"command","action":"dance"}"#).is_err());
        assert!(parse_command(r#"{"type":"status","action":"stop"}"#).is_err());
        assert!(parse_command("not json").is_err());
    }
}
