//! Simulated rig: no devices, motion emulated with sleeps

use crate::backend::HardwareBackend;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use sorter_core::config::SorterConfig;
use sorter_core::{Frame, GripperState, HardwareCapabilities, NamedPosition, Result, SorterError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 28]);
const BORDER: Rgb<u8> = Rgb([0, 170, 90]);
const BOARD: Rgb<u8> = Rgb([30, 90, 40]);

/// Backend used when no hardware is available, and in tests
pub struct SimulatedBackend {
    width: u32,
    height: u32,
    positions: BTreeSet<NamedPosition>,
    conveyor_latency: Duration,
    arm_latency: Duration,
    gripper_latency: Duration,
    sensor_state: AtomicBool,
    conveyor_running: AtomicBool,
    arm_position: Mutex<Option<NamedPosition>>,
    gripper: Mutex<Option<GripperState>>,
    sensor_reads: AtomicU64,
    captures: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(config: &SorterConfig) -> Result<Self> {
        let positions = config.arm.position_table()?.into_keys().collect();
        info!(
            "Simulated backend ready ({}x{}, conveyor {}ms, arm {}ms)",
            config.camera.width,
            config.camera.height,
            config.hardware.sim_conveyor_ms,
            config.hardware.sim_arm_ms
        );
        Ok(Self {
            width: config.camera.width,
            height: config.camera.height,
            positions,
            conveyor_latency: Duration::from_millis(config.hardware.sim_conveyor_ms),
            arm_latency: Duration::from_millis(config.hardware.sim_arm_ms),
            gripper_latency: config.arm.gripper.settle(),
            sensor_state: AtomicBool::new(false),
            conveyor_running: AtomicBool::new(false),
            arm_position: Mutex::new(None),
            gripper: Mutex::new(None),
            sensor_reads: AtomicU64::new(0),
            captures: AtomicU64::new(0),
        })
    }

    /// Last position the arm was driven to
    pub fn arm_position(&self) -> Option<NamedPosition> {
        *self.arm_position.lock()
    }

    pub fn conveyor_running(&self) -> bool {
        self.conveyor_running.load(Ordering::SeqCst)
    }

    pub fn gripper(&self) -> Option<GripperState> {
        *self.gripper.lock()
    }

    pub fn sensor_reads(&self) -> u64 {
        self.sensor_reads.load(Ordering::Relaxed)
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }
}

/// Dark frame with a bordered board in the middle.
pub fn placeholder_image(width: u32, height: u32) -> RgbImage {
    let border = (width.min(height) / 40).max(2);
    let (bx1, by1) = (width / 4, height / 4);
    let (bx2, by2) = (width - width / 4, height - height / 4);
    let (right, bottom) = (width.saturating_sub(border), height.saturating_sub(border));

    RgbImage::from_fn(width, height, |x, y| {
        let on_border = x < border || y < border || x >= right || y >= bottom;
        if on_border {
            BORDER
        } else if x >= bx1 && x < bx2 && y >= by1 && y < by2 {
            BOARD
        } else {
            BACKGROUND
        }
    })
}

#[async_trait]
impl HardwareBackend for SimulatedBackend {
    fn capabilities(&self) -> HardwareCapabilities {
        HardwareCapabilities::Simulated
    }

    async fn read_sensor(&self) -> Result<bool> {
        // false, true, false, ...
        self.sensor_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.sensor_state.fetch_xor(true, Ordering::SeqCst))
    }

    async fn capture_image(&self) -> Result<Frame> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        Ok(Frame::raw(placeholder_image(self.width, self.height)))
    }

    async fn move_conveyor(&self, distance: f64, speed: f64) -> Result<()> {
        if distance <= 0.0 || speed <= 0.0 {
            return Ok(());
        }
        debug!("Simulated conveyor: distance={} speed={}", distance, speed);
        self.conveyor_running.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.conveyor_latency).await;
        self.conveyor_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_conveyor(&self) -> Result<()> {
        self.conveyor_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn move_arm_to(&self, position: NamedPosition) -> Result<()> {
        if !self.positions.contains(&position) {
            return Err(SorterError::UnknownPosition(position.to_string()));
        }
        debug!("Simulated arm -> {}", position);
        tokio::time::sleep(self.arm_latency).await;
        *self.arm_position.lock() = Some(position);
        Ok(())
    }

    async fn set_gripper(&self, state: GripperState) -> Result<()> {
        debug!("Simulated gripper -> {}", state);
        tokio::time::sleep(self.gripper_latency).await;
        *self.gripper.lock() = Some(state);
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.conveyor_running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
