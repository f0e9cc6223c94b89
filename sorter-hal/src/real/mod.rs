//! Physical rig: sysfs GPIO sensor and conveyor relay, PWM servo arm, camera

pub mod camera;
pub mod gpio;
pub mod servo;

use crate::backend::HardwareBackend;
use async_trait::async_trait;
use camera::Camera;
use gpio::{Direction, GpioPin};
use servo::ServoArm;
use sorter_core::config::{ConveyorConfig, SorterConfig};
use sorter_core::{Frame, GripperState, HardwareCapabilities, NamedPosition, Result, SorterError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Switches the relay off when dropped, so a cancelled motion never leaves
/// the belt running.
struct RelayGuard<'a>(&'a GpioPin);

impl Drop for RelayGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.write(false) {
            warn!("Failed to switch conveyor relay off: {}", e);
        }
    }
}

pub struct RealBackend {
    sensor: GpioPin,
    sensor_active_high: bool,
    conveyor: GpioPin,
    conveyor_config: ConveyorConfig,
    arm: ServoArm,
    camera: Camera,
    released: AtomicBool,
}

impl RealBackend {
    /// Open every device. Anything opened before a failure is released again.
    pub fn initialize(config: &SorterConfig) -> Result<Self> {
        let gpio_root = &config.hardware.gpio_root;

        let sensor = GpioPin::open(gpio_root, config.sensor.gpio_pin, Direction::In)?;

        let conveyor = match GpioPin::open(gpio_root, config.conveyor.gpio_pin, Direction::Out)
            .and_then(|pin| pin.write(false).map(|_| pin))
        {
            Ok(pin) => pin,
            Err(e) => {
                sensor.release();
                return Err(e);
            }
        };

        let arm = match ServoArm::open(&config.arm) {
            Ok(arm) => arm,
            Err(e) => {
                conveyor.release();
                sensor.release();
                return Err(e);
            }
        };

        let camera = match Camera::open(&config.camera) {
            Ok(camera) => camera,
            Err(e) => {
                arm.release();
                conveyor.release();
                sensor.release();
                return Err(e);
            }
        };

        info!(
            "Real backend ready (sensor gpio {}, conveyor gpio {}, camera {})",
            sensor.pin(),
            conveyor.pin(),
            config.camera.index
        );

        Ok(Self {
            sensor,
            sensor_active_high: config.sensor.active_high,
            conveyor,
            conveyor_config: config.conveyor.clone(),
            arm,
            camera,
            released: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SorterError::ActuationFailed("hardware already released".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HardwareBackend for RealBackend {
    fn capabilities(&self) -> HardwareCapabilities {
        HardwareCapabilities::Real
    }

    async fn read_sensor(&self) -> Result<bool> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SorterError::SensorReadError("hardware already released".to_string()));
        }
        let level = self.sensor.read()?;
        Ok(level == self.sensor_active_high)
    }

    async fn capture_image(&self) -> Result<Frame> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SorterError::CaptureFailed("hardware already released".to_string()));
        }
        self.camera.capture().await
    }

    async fn move_conveyor(&self, distance: f64, speed: f64) -> Result<()> {
        self.ensure_open()?;
        let duration = self.conveyor_config.motion_duration(distance, speed);
        if duration.is_zero() {
            return Ok(());
        }
        self.conveyor.write(true)?;
        let _relay = RelayGuard(&self.conveyor);
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn stop_conveyor(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.conveyor.write(false)
    }

    async fn move_arm_to(&self, position: NamedPosition) -> Result<()> {
        if !self.arm.knows(position) {
            return Err(SorterError::UnknownPosition(position.to_string()));
        }
        self.ensure_open()?;
        self.arm.move_to(position).await
    }

    async fn set_gripper(&self, state: GripperState) -> Result<()> {
        self.ensure_open()?;
        self.arm.set_gripper(state).await
    }

    async fn cleanup(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.conveyor.write(false) {
            warn!("Conveyor off during cleanup failed: {}", e);
        }
        self.camera.release();
        self.arm.release();
        self.conveyor.release();
        self.sensor.release();
        info!("Real backend released");
        Ok(())
    }
}
