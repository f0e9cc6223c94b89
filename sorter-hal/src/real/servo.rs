//! Servo arm over sysfs PWM (`/sys/class/pwm/pwmchipN`)

use sorter_core::config::{ArmConfig, GripperConfig, JointConfig};
use sorter_core::{GripperState, NamedPosition, Result, SorterError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Map an angle to a pulse width, clamped to the joint's calibration.
pub fn angle_to_pulse_us(joint: &JointConfig, angle: f64) -> u32 {
    let angle = angle.clamp(joint.min_angle, joint.max_angle);
    let span = joint.max_angle - joint.min_angle;
    let fraction = if span > 0.0 { (angle - joint.min_angle) / span } else { 0.0 };
    let pulse = joint.min_pulse_us as f64
        + fraction * (joint.max_pulse_us as f64 - joint.min_pulse_us as f64);
    pulse.round() as u32
}

/// One PWM output driving one servo
#[derive(Debug)]
pub struct PwmChannel {
    dir: PathBuf,
    channel: u32,
}

impl PwmChannel {
    pub fn open(chip: &Path, channel: u32, period_ns: u64) -> Result<Self> {
        let dir = chip.join(format!("pwm{}", channel));
        if !dir.exists() {
            fs::write(chip.join("export"), channel.to_string()).map_err(|e| {
                SorterError::ActuationFailed(format!("failed to export pwm {}: {}", channel, e))
            })?;
        }
        let pwm = Self { dir, channel };
        pwm.write_attr("period", &period_ns.to_string())?;
        pwm.write_attr("enable", "1")?;
        Ok(pwm)
    }

    fn write_attr(&self, name: &str, value: &str) -> Result<()> {
        fs::write(self.dir.join(name), value).map_err(|e| {
            SorterError::ActuationFailed(format!(
                "pwm {} write {}={} failed: {}",
                self.channel, name, value, e
            ))
        })
    }

    pub fn set_pulse_us(&self, pulse_us: u32) -> Result<()> {
        self.write_attr("duty_cycle", &(pulse_us as u64 * 1000).to_string())
    }

    pub fn disable(&self) -> Result<()> {
        self.write_attr("enable", "0")
    }
}

struct Joint {
    config: JointConfig,
    pwm: PwmChannel,
}

/// Arm made of calibrated joints and a named-position table
pub struct ServoArm {
    joints: Vec<Joint>,
    positions: BTreeMap<NamedPosition, BTreeMap<String, f64>>,
    gripper: GripperConfig,
    step_delay: Duration,
}

impl ServoArm {
    /// Open one PWM channel per joint. Channels opened before a failure are
    /// disabled again.
    pub fn open(config: &ArmConfig) -> Result<Self> {
        let positions = config.position_table()?;
        let mut joints: Vec<Joint> = Vec::with_capacity(config.joints.len());
        for joint in &config.joints {
            match PwmChannel::open(&config.pwm_chip, joint.channel, config.pwm_period_ns) {
                Ok(pwm) => joints.push(Joint {
                    config: joint.clone(),
                    pwm,
                }),
                Err(e) => {
                    release_joints(&joints);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            joints,
            positions,
            gripper: config.gripper.clone(),
            step_delay: Duration::from_millis(config.joint_step_delay_ms),
        })
    }

    pub fn knows(&self, position: NamedPosition) -> bool {
        self.positions.contains_key(&position)
    }

    /// Pulse widths for every joint the position names, in joint order.
    pub fn pulses_for(&self, position: NamedPosition) -> Result<Vec<(u32, u32)>> {
        let angles = self
            .positions
            .get(&position)
            .ok_or_else(|| SorterError::UnknownPosition(position.to_string()))?;
        Ok(self
            .joints
            .iter()
            .filter_map(|joint| {
                angles
                    .get(&joint.config.name)
                    .map(|angle| (joint.config.channel, angle_to_pulse_us(&joint.config, *angle)))
            })
            .collect())
    }

    /// Step each joint to its target, pausing between joints.
    pub async fn move_to(&self, position: NamedPosition) -> Result<()> {
        let angles = self
            .positions
            .get(&position)
            .ok_or_else(|| SorterError::UnknownPosition(position.to_string()))?;
        for joint in &self.joints {
            let Some(angle) = angles.get(&joint.config.name) else {
                continue;
            };
            let pulse = angle_to_pulse_us(&joint.config, *angle);
            debug!("{} -> {:.1} deg ({} us)", joint.config.name, angle, pulse);
            joint.pwm.set_pulse_us(pulse)?;
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(())
    }

    /// Channel and pulse that put the gripper into `state`
    pub fn gripper_pulse(&self, state: GripperState) -> Result<(u32, u32)> {
        let joint = self
            .joints
            .iter()
            .find(|j| j.config.name == self.gripper.joint)
            .ok_or_else(|| {
                SorterError::ActuationFailed(format!("no gripper joint '{}'", self.gripper.joint))
            })?;
        let pulse = angle_to_pulse_us(&joint.config, self.gripper.angle(state));
        Ok((joint.config.channel, pulse))
    }

    pub async fn set_gripper(&self, state: GripperState) -> Result<()> {
        let (channel, pulse) = self.gripper_pulse(state)?;
        let joint = self
            .joints
            .iter()
            .find(|j| j.config.channel == channel)
            .ok_or_else(|| SorterError::ActuationFailed(format!("no pwm channel {}", channel)))?;
        debug!("gripper {} ({} us)", state, pulse);
        joint.pwm.set_pulse_us(pulse)?;
        tokio::time::sleep(self.gripper.settle()).await;
        Ok(())
    }

    pub fn release(&self) {
        release_joints(&self.joints);
    }
}

fn release_joints(joints: &[Joint]) {
    for joint in joints {
        if let Err(e) = joint.pwm.disable() {
            warn!("Failed to disable {}: {}", joint.config.name, e);
        }
    }
}
