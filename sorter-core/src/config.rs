//! Configuration for the sorting line
//!
//! Layering: built-in defaults, then an optional TOML file, then environment
//! variables prefixed `SORTER__` (sections separated by `__`, e.g.
//! `SORTER__CYCLE__DEBOUNCE_MS=300`).

use crate::error::{Result, SorterError};
use crate::types::{CycleOutcome, GripperState, NamedPosition, Verdict};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Camera capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera device index (0, 1, 2, etc.)
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
        }
    }
}

/// Photoelectric arrival sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub gpio_pin: u32,
    /// Sensor reads HIGH when an object is present
    pub active_high: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 17,
            active_high: true,
        }
    }
}

/// Conveyor relay and open-loop timing model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    pub gpio_pin: u32,
    /// Distance from the capture point to the pick point
    pub pickup_distance: f64,
    /// Speed in percent used to reach the pick point
    pub pickup_speed: f64,
    pub nudge_distance: f64,
    pub nudge_speed: f64,
    /// duration = distance / (speed * speed_scale)
    pub speed_scale: f64,
    /// Added to the expected motion duration to form the timeout
    pub timeout_margin_ms: u64,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 27,
            pickup_distance: 15.0,
            pickup_speed: 70.0,
            nudge_distance: 10.0,
            nudge_speed: 50.0,
            speed_scale: 0.1,
            timeout_margin_ms: 2000,
        }
    }
}

impl ConveyorConfig {
    /// Expected run time of a motion. Non-positive inputs mean no motion.
    pub fn motion_duration(&self, distance: f64, speed: f64) -> Duration {
        if distance <= 0.0 || speed <= 0.0 || self.speed_scale <= 0.0 {
            return Duration::ZERO;
        }
        let secs = distance / (speed * self.speed_scale);
        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    pub fn motion_timeout(&self, distance: f64, speed: f64) -> Duration {
        self.motion_duration(distance, speed) + Duration::from_millis(self.timeout_margin_ms)
    }
}

/// One servo joint of the arm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointConfig {
    pub name: String,
    /// PWM channel on the servo driver
    pub channel: u32,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    pub min_angle: f64,
    pub max_angle: f64,
}

impl JointConfig {
    fn standard(name: &str, channel: u32) -> Self {
        Self {
            name: name.to_string(),
            channel,
            min_pulse_us: 500,
            max_pulse_us: 2500,
            min_angle: 0.0,
            max_angle: 180.0,
        }
    }
}

/// Gripper joint, driven separately from the named poses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    /// Name of the joint in `arm.joints` that opens and closes the jaws
    pub joint: String,
    pub open_angle: f64,
    pub closed_angle: f64,
    /// Pause after the jaws move, so the unit is held or dropped
    pub settle_ms: u64,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            joint: "gripper".to_string(),
            open_angle: 30.0,
            closed_angle: 90.0,
            settle_ms: 500,
        }
    }
}

impl GripperConfig {
    pub fn angle(&self, state: GripperState) -> f64 {
        match state {
            GripperState::Open => self.open_angle,
            GripperState::Closed => self.closed_angle,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Multi-joint arm: channel mapping, calibration and the named-position table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub pwm_chip: PathBuf,
    /// 50 Hz servo frame
    pub pwm_period_ns: u64,
    pub joints: Vec<JointConfig>,
    /// position name -> (joint name -> angle in degrees). Poses never name
    /// the gripper joint.
    pub positions: BTreeMap<String, BTreeMap<String, f64>>,
    pub gripper: GripperConfig,
    pub move_timeout_ms: u64,
    pub joint_step_delay_ms: u64,
}

impl Default for ArmConfig {
    fn default() -> Self {
        fn pose(angles: &[(&str, f64)]) -> BTreeMap<String, f64> {
            angles.iter().map(|(j, a)| (j.to_string(), *a)).collect()
        }

        let mut positions = BTreeMap::new();
        positions.insert(
            "home".to_string(),
            pose(&[("base", 90.0), ("shoulder", 150.0), ("elbow", 30.0)]),
        );
        positions.insert(
            "pickup_approach".to_string(),
            pose(&[("base", 90.0), ("shoulder", 120.0), ("elbow", 60.0)]),
        );
        positions.insert(
            "pickup".to_string(),
            pose(&[("base", 90.0), ("shoulder", 100.0), ("elbow", 80.0)]),
        );
        positions.insert(
            "zone_pass".to_string(),
            pose(&[("base", 30.0), ("shoulder", 100.0), ("elbow", 80.0)]),
        );
        positions.insert(
            "zone_defect_1".to_string(),
            pose(&[("base", 150.0), ("shoulder", 100.0), ("elbow", 80.0)]),
        );

        Self {
            pwm_chip: PathBuf::from("/sys/class/pwm/pwmchip0"),
            pwm_period_ns: 20_000_000,
            joints: vec![
                JointConfig::standard("base", 0),
                JointConfig::standard("shoulder", 1),
                JointConfig::standard("elbow", 2),
                JointConfig::standard("wrist_roll", 3),
                JointConfig::standard("wrist_pitch", 4),
                JointConfig::standard("gripper", 5),
            ],
            positions,
            gripper: GripperConfig::default(),
            move_timeout_ms: 5000,
            joint_step_delay_ms: 100,
        }
    }
}

impl ArmConfig {
    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    /// Parse the position table into typed keys.
    pub fn position_table(&self) -> Result<BTreeMap<NamedPosition, BTreeMap<String, f64>>> {
        self.positions
            .iter()
            .map(|(name, angles)| {
                let position = name.parse::<NamedPosition>().map_err(|_| {
                    SorterError::Configuration(format!("unrecognised arm position '{}'", name))
                })?;
                Ok((position, angles.clone()))
            })
            .collect()
    }
}

/// Timing of the cycle state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub capture_cooldown_ms: u64,
    /// Pause between a finished cycle and the next trigger wait
    pub inter_cycle_delay_ms: u64,
    pub sensor_timeout_ms: u64,
    pub capture_timeout_ms: u64,
    pub inference_timeout_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            debounce_ms: 500,
            capture_cooldown_ms: 1000,
            inter_cycle_delay_ms: 1000,
            sensor_timeout_ms: 1000,
            capture_timeout_ms: 5000,
            inference_timeout_ms: 10_000,
        }
    }
}

impl CycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn capture_cooldown(&self) -> Duration {
        Duration::from_millis(self.capture_cooldown_ms)
    }

    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_millis(self.inter_cycle_delay_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

/// Routing of verdicts to drop zones
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingConfig {
    /// defect label -> defect zone number
    pub defect_zone_map: BTreeMap<String, u8>,
    pub default_defect_zone: u8,
}

impl Default for SortingConfig {
    fn default() -> Self {
        Self {
            defect_zone_map: BTreeMap::new(),
            default_defect_zone: 1,
        }
    }
}

impl SortingConfig {
    /// Drop position for an outcome. Defects go to the zone of the first
    /// mapped label in lexicographic order, else the default zone.
    pub fn place_position(&self, outcome: &CycleOutcome) -> NamedPosition {
        match outcome.verdict {
            Verdict::Pass => NamedPosition::ZonePass,
            Verdict::Defect => {
                let zone = outcome
                    .defect_labels
                    .iter()
                    .find_map(|label| {
                        self.defect_zone_map
                            .iter()
                            .find(|(mapped, _)| mapped.eq_ignore_ascii_case(label))
                            .map(|(_, zone)| *zone)
                    })
                    .unwrap_or(self.default_defect_zone);
                NamedPosition::ZoneDefect(zone)
            }
        }
    }
}

/// Vision backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub model_path: PathBuf,
    /// Class names indexed by model output class id
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Square model input edge in pixels
    pub input_size: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/pcb_defects.onnx"),
            class_names: vec![
                "missing_hole".to_string(),
                "mouse_bite".to_string(),
                "open_circuit".to_string(),
                "short".to_string(),
                "spur".to_string(),
                "spurious_copper".to_string(),
            ],
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Live frame streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub rate_hz: u32,
    pub jpeg_quality: u8,
    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate_hz: 20,
            jpeg_quality: 80,
            event_buffer_size: 256,
        }
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz.max(1) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Probe the platform, fall back to simulation
    Auto,
    Real,
    Simulated,
}

/// Backend selection and simulation latencies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub backend: BackendPreference,
    pub gpio_root: PathBuf,
    pub sim_conveyor_ms: u64,
    pub sim_arm_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            sim_conveyor_ms: 1000,
            sim_arm_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

/// Complete sorting line configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub camera: CameraConfig,
    pub sensor: SensorConfig,
    pub conveyor: ConveyorConfig,
    pub arm: ArmConfig,
    pub cycle: CycleConfig,
    pub sorting: SortingConfig,
    pub vision: VisionConfig,
    pub stream: StreamConfig,
    pub hardware: HardwareConfig,
    pub server: ServerConfig,
}

impl SorterConfig {
    /// Load defaults, an optional TOML file and `SORTER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&SorterConfig::default())?);
        if let Some(path) = path {
            if !path.exists() {
                return Err(SorterError::Configuration(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("SORTER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: SorterConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults (no environment).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SorterConfig = Config::builder()
            .add_source(Config::try_from(&SorterConfig::default())?)
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SorterError::Configuration(msg));

        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera resolution must be non-zero".to_string());
        }
        if self.cycle.poll_interval_ms == 0 {
            return invalid("cycle.poll_interval_ms must be > 0".to_string());
        }
        if self.cycle.sensor_timeout_ms == 0
            || self.cycle.capture_timeout_ms == 0
            || self.cycle.inference_timeout_ms == 0
        {
            return invalid("cycle timeouts must be > 0".to_string());
        }
        if self.conveyor.speed_scale <= 0.0 {
            return invalid("conveyor.speed_scale must be > 0".to_string());
        }
        if self.conveyor.pickup_distance <= 0.0 || self.conveyor.pickup_speed <= 0.0 {
            return invalid("conveyor pickup distance and speed must be > 0".to_string());
        }
        if self.arm.move_timeout_ms == 0 {
            return invalid("arm.move_timeout_ms must be > 0".to_string());
        }
        if self.arm.joints.is_empty() {
            return invalid("arm.joints must not be empty".to_string());
        }
        for joint in &self.arm.joints {
            if joint.min_pulse_us >= joint.max_pulse_us {
                return invalid(format!("joint '{}': min_pulse_us must be < max_pulse_us", joint.name));
            }
            if joint.min_angle >= joint.max_angle {
                return invalid(format!("joint '{}': min_angle must be < max_angle", joint.name));
            }
        }

        let gripper = &self.arm.gripper;
        if !self.arm.joints.iter().any(|j| j.name == gripper.joint) {
            return invalid(format!("arm.gripper.joint '{}' is not a configured joint", gripper.joint));
        }
        if gripper.open_angle == gripper.closed_angle {
            return invalid("arm.gripper open and closed angles must differ".to_string());
        }

        let table = self.arm.position_table()?;
        for required in [
            NamedPosition::Home,
            NamedPosition::PickupApproach,
            NamedPosition::Pickup,
            NamedPosition::ZonePass,
        ] {
            if !table.contains_key(&required) {
                return invalid(format!("arm.positions is missing '{}'", required));
            }
        }
        for (position, angles) in &table {
            for joint in angles.keys() {
                if !self.arm.joints.iter().any(|j| &j.name == joint) {
                    return invalid(format!("position '{}' references unknown joint '{}'", position, joint));
                }
                if *joint == gripper.joint {
                    return invalid(format!(
                        "position '{}' sets the gripper joint; use arm.gripper instead",
                        position
                    ));
                }
            }
        }

        if self.sorting.default_defect_zone == 0 {
            return invalid("sorting.default_defect_zone must be >= 1".to_string());
        }
        if self.sorting.defect_zone_map.values().any(|zone| *zone == 0) {
            return invalid("sorting.defect_zone_map zones must be >= 1".to_string());
        }
        // every zone a defect can be routed to needs a drop pose
        let zones = self
            .sorting
            .defect_zone_map
            .values()
            .chain(std::iter::once(&self.sorting.default_defect_zone));
        for zone in zones {
            let position = NamedPosition::ZoneDefect(*zone);
            if !table.contains_key(&position) {
                return invalid(format!(
                    "sorting routes defects to '{}' but arm.positions has no such entry",
                    position
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.vision.confidence_threshold) {
            return invalid("vision.confidence_threshold must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.vision.iou_threshold) {
            return invalid("vision.iou_threshold must be between 0.0 and 1.0".to_string());
        }

        if self.stream.rate_hz == 0 || self.stream.rate_hz > 120 {
            return invalid("stream.rate_hz must be between 1 and 120".to_string());
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return invalid("stream.jpeg_quality must be between 1 and 100".to_string());
        }
        if self.stream.event_buffer_size == 0 {
            return invalid("stream.event_buffer_size must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Detection};

    fn outcome(labels: &[&str]) -> CycleOutcome {
        let detections: Vec<Detection> = labels
            .iter()
            .map(|l| Detection::new(*l, 0.8, BoundingBox::new(0, 0, 4, 4).unwrap()).unwrap())
            .collect();
        CycleOutcome::from_detections(&detections)
    }

    #[test]
    fn test_config_default_is_valid() {
        let config = SorterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.cycle.debounce(), Duration::from_millis(500));
        assert_eq!(config.stream.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_conveyor_timing_model() {
        let conveyor = ConveyorConfig::default();
        // 15 / (70 * 0.1) ~= 2.14s
        let duration = conveyor.motion_duration(15.0, 70.0);
        assert!((duration.as_secs_f64() - 15.0 / 7.0).abs() < 1e-9);
        assert_eq!(
            conveyor.motion_timeout(15.0, 70.0),
            duration + Duration::from_millis(2000)
        );
        assert_eq!(conveyor.motion_duration(0.0, 70.0), Duration::ZERO);
        assert_eq!(conveyor.motion_duration(10.0, -1.0), Duration::ZERO);
    }

    #[test]
    fn test_place_position_routing() {
        let mut sorting = SortingConfig::default();
        sorting.defect_zone_map.insert("short".to_string(), 2);
        sorting.defect_zone_map.insert("spur".to_string(), 3);

        assert_eq!(sorting.place_position(&outcome(&[])), NamedPosition::ZonePass);
        assert_eq!(
            sorting.place_position(&outcome(&["mouse_bite"])),
            NamedPosition::ZoneDefect(1)
        );
        assert_eq!(
            sorting.place_position(&outcome(&["spur", "short"])),
            NamedPosition::ZoneDefect(2)
        );
        assert_eq!(
            sorting.place_position(&outcome(&["SPUR"])),
            NamedPosition::ZoneDefect(3)
        );
    }

    #[test]
    fn test_validation_rejects_missing_home() {
        let mut config = SorterConfig::default();
        config.arm.positions.remove("home");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_joint() {
        let mut config = SorterConfig::default();
        config
            .arm
            .positions
            .get_mut("pickup")
            .unwrap()
            .insert("elbow_2".to_string(), 10.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unreachable_defect_zone() {
        let mut config = SorterConfig::default();
        config.sorting.defect_zone_map.insert("short".to_string(), 2);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zone_defect_2"));

        let zone1 = config.arm.positions["zone_defect_1"].clone();
        config.arm.positions.insert("zone_defect_2".to_string(), zone1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_default_zone() {
        let mut config = SorterConfig::default();
        config.arm.positions.remove("zone_defect_1");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("zone_defect_1"));
    }

    #[test]
    fn test_validation_gripper_rules() {
        let mut config = SorterConfig::default();
        config.arm.gripper.joint = "claw".to_string();
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config.arm.gripper.closed_angle = config.arm.gripper.open_angle;
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config
            .arm
            .positions
            .get_mut("zone_pass")
            .unwrap()
            .insert("gripper".to_string(), 30.0);
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config.arm.positions.remove("pickup_approach");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_calibration() {
        let mut config = SorterConfig::default();
        config.arm.joints[0].min_pulse_us = 2600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_edge_cases() {
        let mut config = SorterConfig::default();
        config.cycle.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config.stream.rate_hz = 121;
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config.vision.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = SorterConfig::default();
        config.sorting.default_defect_zone = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_position_table_rejects_bad_names() {
        let mut config = SorterConfig::default();
        config
            .arm
            .positions
            .insert("class1".to_string(), BTreeMap::new());
        assert!(config.arm.position_table().is_err());
    }
}
