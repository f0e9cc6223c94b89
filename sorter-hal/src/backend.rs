//! Capability interface shared by every hardware variant

use async_trait::async_trait;
use sorter_core::{Frame, GripperState, HardwareCapabilities, NamedPosition, Result};

/// Sensing and actuation primitives consumed by the cycle engine.
///
/// Methods take `&self`; implementations serialize access to their own
/// devices. Callers bound every call with a timeout, implementations never
/// retry internally.
#[async_trait]
pub trait HardwareBackend: Send + Sync {
    /// Which variant this is
    fn capabilities(&self) -> HardwareCapabilities;

    /// Single non-blocking read of the arrival sensor
    async fn read_sensor(&self) -> Result<bool>;

    /// Grab one raw frame
    async fn capture_image(&self) -> Result<Frame>;

    /// Run the conveyor for `distance` at `speed` percent, returning once the
    /// motion has finished. Non-positive distance or speed is a no-op.
    async fn move_conveyor(&self, distance: f64, speed: f64) -> Result<()>;

    /// Stop the conveyor. Always safe, idempotent.
    async fn stop_conveyor(&self) -> Result<()>;

    /// Drive the arm to a named position from the configured table
    async fn move_arm_to(&self, position: NamedPosition) -> Result<()>;

    /// Open or close the gripper, returning once the jaws have settled
    async fn set_gripper(&self, state: GripperState) -> Result<()>;

    /// Release devices. Idempotent and safe after partial initialization.
    async fn cleanup(&self) -> Result<()>;
}
