//! sorter-core: shared vocabulary of the sorting line
//!
//! Provides:
//! - The data model exchanged between hardware, vision and the cycle engine
//! - The error taxonomy used to route failures to engine transitions
//! - Layered configuration (defaults, TOML file, environment)
//! - The event/command contract spoken to external observers

pub mod types;
pub mod error;
pub mod config;
pub mod events;

pub use error::{SorterError, Result};
pub use types::{
    BoundingBox, Detection, Frame, FrameTag, Verdict, CycleOutcome, NamedPosition,
    HardwareCapabilities, EngineState, StatusClass, ControlCommand, GripperState,
};
pub use config::{BackendPreference, SorterConfig};
pub use events::{parse_command, SorterEvent};
