//! sorter-engine: orchestration of the sorting line
//!
//! - [`CycleEngine`]: one sort cycle at a time, as an explicit state machine
//! - [`FrameHub`] / [`FrameBroadcaster`]: last-value-wins frame store and the
//!   bounded-rate encoder feeding observers
//! - [`ControlSurface`]: start/stop/manual/reset commands, serialized against
//!   the engine
//! - [`SortingLine`]: wires the pieces together

pub mod cancellation;
pub mod control;
pub mod engine;
pub mod event_bus;
pub mod frame_hub;
pub mod line;

pub use cancellation::CancellationToken;
pub use control::ControlSurface;
pub use engine::{sort_sequence, ArmStep, CounterSnapshot, CycleEngine, RunExit};
pub use event_bus::EventBus;
pub use frame_hub::{EncodedFrame, FrameBroadcaster, FrameHub};
pub use line::SortingLine;
