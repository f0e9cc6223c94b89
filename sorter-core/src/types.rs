//! Data model shared by every stage of a sort cycle

use crate::error::{Result, SorterError};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Axis-aligned box in pixel coordinates, `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(SorterError::InvalidDetection(format!(
                "degenerate box ({}, {}, {}, {})",
                x1, y1, x2, y2
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1) as u32
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix1 >= ix2 || iy1 >= iy2 {
            return 0.0;
        }
        let inter = (ix2 - ix1) as i64 * (iy2 - iy1) as i64;
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }
}

/// One labeled box returned by a vision backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        let class_label = class_label.into();
        if class_label.is_empty() {
            return Err(SorterError::InvalidDetection("empty class label".to_string()));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(SorterError::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self { class_label, confidence, bbox })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTag {
    Raw,
    Annotated,
}

impl FrameTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameTag::Raw => "raw",
            FrameTag::Annotated => "annotated",
        }
    }
}

/// Image buffer tagged with its role. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    tag: FrameTag,
    image: Arc<RgbImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(tag: FrameTag, image: RgbImage) -> Self {
        Self {
            tag,
            image: Arc::new(image),
            captured_at: Utc::now(),
        }
    }

    pub fn raw(image: RgbImage) -> Self {
        Self::new(FrameTag::Raw, image)
    }

    /// Build a frame derived from this one (e.g. the annotated copy),
    /// keeping the original capture timestamp.
    pub fn derive(&self, tag: FrameTag, image: RgbImage) -> Self {
        Self {
            tag,
            image: Arc::new(image),
            captured_at: self.captured_at,
        }
    }

    pub fn tag(&self) -> FrameTag {
        self.tag
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// True when both frames share one pixel buffer.
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Defect,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "Pass",
            Verdict::Defect => "Defect",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision computed once per cycle from the detection list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub verdict: Verdict,
    pub defect_labels: BTreeSet<String>,
}

impl CycleOutcome {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let defect_labels: BTreeSet<String> = detections
            .iter()
            .map(|d| d.class_label.clone())
            .collect();
        let verdict = if defect_labels.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Defect
        };
        Self { verdict, defect_labels }
    }

    /// Labels joined for display, `"none"` on a pass.
    pub fn labels_text(&self) -> String {
        if self.defect_labels.is_empty() {
            "none".to_string()
        } else {
            self.defect_labels.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

/// Symbolic arm configuration. Zones for defects are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NamedPosition {
    Home,
    /// Hover point above the pick spot
    PickupApproach,
    Pickup,
    ZonePass,
    ZoneDefect(u8),
}

impl fmt::Display for NamedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamedPosition::Home => f.write_str("home"),
            NamedPosition::PickupApproach => f.write_str("pickup_approach"),
            NamedPosition::Pickup => f.write_str("pickup"),
            NamedPosition::ZonePass => f.write_str("zone_pass"),
            NamedPosition::ZoneDefect(k) => write!(f, "zone_defect_{}", k),
        }
    }
}

impl FromStr for NamedPosition {
    type Err = SorterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "home" => Ok(NamedPosition::Home),
            "pickup_approach" => Ok(NamedPosition::PickupApproach),
            "pickup" => Ok(NamedPosition::Pickup),
            "zone_pass" => Ok(NamedPosition::ZonePass),
            other => other
                .strip_prefix("zone_defect_")
                .and_then(|k| k.parse::<u8>().ok())
                .filter(|k| *k >= 1)
                .map(NamedPosition::ZoneDefect)
                .ok_or_else(|| SorterError::UnknownPosition(other.to_string())),
        }
    }
}

impl TryFrom<String> for NamedPosition {
    type Error = SorterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NamedPosition> for String {
    fn from(position: NamedPosition) -> Self {
        position.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperState {
    Open,
    Closed,
}

impl fmt::Display for GripperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GripperState::Open => f.write_str("open"),
            GripperState::Closed => f.write_str("closed"),
        }
    }
}

/// Which hardware backend variant is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareCapabilities {
    Real,
    Simulated,
}

impl fmt::Display for HardwareCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareCapabilities::Real => f.write_str("real"),
            HardwareCapabilities::Simulated => f.write_str("simulated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    WaitingForTrigger,
    Settling,
    Capturing,
    Inferring,
    Deciding,
    Transporting,
    Sorting,
    Returning,
    Faulted,
}

impl EngineState {
    pub fn status_class(&self) -> StatusClass {
        match self {
            EngineState::Idle => StatusClass::Idle,
            EngineState::Faulted => StatusClass::Fault,
            _ => StatusClass::Running,
        }
    }

    /// States in which an actuator sub-sequence may be in flight.
    pub fn is_actuating(&self) -> bool {
        matches!(self, EngineState::Transporting | EngineState::Sorting)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Idle,
    Running,
    Stopped,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "manual_conveyor")]
    ManualConveyorNudge,
    #[serde(rename = "manual_arm_home")]
    ManualArmHome,
    #[serde(rename = "reset")]
    Reset,
}

impl ControlCommand {
    pub fn action(&self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::ManualConveyorNudge => "manual_conveyor",
            ControlCommand::ManualArmHome => "manual_arm_home",
            ControlCommand::Reset => "reset",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = SorterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "manual_conveyor" => Ok(ControlCommand::ManualConveyorNudge),
            "manual_arm_home" => Ok(ControlCommand::ManualArmHome),
            "reset" => Ok(ControlCommand::Reset),
            other => Err(SorterError::Serialization(format!("unknown action '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(label: &str) -> Detection {
        Detection::new(label, 0.9, BoundingBox::new(0, 0, 10, 10).unwrap()).unwrap()
    }

    #[test]
    fn test_bbox_rejects_degenerate() {
        assert!(BoundingBox::new(5, 0, 5, 10).is_err());
        assert!(BoundingBox::new(0, 10, 10, 2).is_err());
        assert!(BoundingBox::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn test_bbox_iou() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(5, 0, 15, 10).unwrap();
        let c = BoundingBox::new(20, 20, 30, 30).unwrap();
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_detection_confidence_range() {
        let bbox = BoundingBox::new(0, 0, 2, 2).unwrap();
        assert!(Detection::new("bridge", 1.2, bbox).is_err());
        assert!(Detection::new("bridge", -0.1, bbox).is_err());
        assert!(Detection::new("bridge", f32::NAN, bbox).is_err());
        assert!(Detection::new("", 0.5, bbox).is_err());
        assert!(Detection::new("bridge", 0.0, bbox).is_ok());
    }

    #[test]
    fn test_outcome_pass_on_empty() {
        let outcome = CycleOutcome::from_detections(&[]);
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert!(outcome.defect_labels.is_empty());
        assert_eq!(outcome.labels_text(), "none");
    }

    #[test]
    fn test_outcome_deduplicates_labels() {
        let outcome = CycleOutcome::from_detections(&[
            detection("bridge"),
            detection("bridge"),
            detection("open"),
        ]);
        assert_eq!(outcome.verdict, Verdict::Defect);
        let expected: BTreeSet<String> = ["bridge", "open"].iter().map(|s| s.to_string()).collect();
        assert_eq!(outcome.defect_labels, expected);
        assert_eq!(outcome.labels_text(), "bridge, open");
    }

    #[test]
    fn test_named_position_parse() {
        assert_eq!("home".parse::<NamedPosition>().unwrap(), NamedPosition::Home);
        assert_eq!(
            "zone_defect_3".parse::<NamedPosition>().unwrap(),
            NamedPosition::ZoneDefect(3)
        );
        assert!(matches!(
            "zone_defect_0".parse::<NamedPosition>(),
            Err(SorterError::UnknownPosition(_))
        ));
        assert!(matches!(
            "class1".parse::<NamedPosition>(),
            Err(SorterError::UnknownPosition(_))
        ));
        assert_eq!(NamedPosition::ZoneDefect(2).to_string(), "zone_defect_2");
        assert_eq!(
            "pickup_approach".parse::<NamedPosition>().unwrap(),
            NamedPosition::PickupApproach
        );
    }

    #[test]
    fn test_named_position_serde() {
        let json = serde_json::to_string(&NamedPosition::ZonePass).unwrap();
        assert_eq!(json, "\"zone_pass\"");
        let parsed: NamedPosition = serde_json::from_str("\"pickup\"").unwrap();
        assert_eq!(parsed, NamedPosition::Pickup);
        assert!(serde_json::from_str::<NamedPosition>("\"elsewhere\"").is_err());
    }

    #[test]
    fn test_engine_state_classes() {
        assert_eq!(EngineState::Idle.status_class(), StatusClass::Idle);
        assert_eq!(EngineState::Sorting.status_class(), StatusClass::Running);
        assert_eq!(EngineState::Faulted.status_class(), StatusClass::Fault);
        assert!(EngineState::Transporting.is_actuating());
        assert!(!EngineState::Settling.is_actuating());
    }

    #[test]
    fn test_frame_derive_keeps_timestamp() {
        let raw = Frame::raw(RgbImage::new(4, 3));
        let annotated = raw.derive(FrameTag::Annotated, RgbImage::new(4, 3));
        assert_eq!(annotated.tag(), FrameTag::Annotated);
        assert_eq!(annotated.captured_at(), raw.captured_at());
        assert!(!annotated.same_buffer(&raw));
        assert!(raw.clone().same_buffer(&raw));
        assert_eq!((raw.width(), raw.height()), (4, 3));
    }

    #[test]
    fn test_control_command_names() {
        for cmd in [
            ControlCommand::Start,
            ControlCommand::Stop,
            ControlCommand::ManualConveyorNudge,
            ControlCommand::ManualArmHome,
            ControlCommand::Reset,
        ] {
            assert_eq!(cmd.action().parse::<ControlCommand>().unwrap(), cmd);
        }
        assert!("jump".parse::<ControlCommand>().is_err());
    }
}
