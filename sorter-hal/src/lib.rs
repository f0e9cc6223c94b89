//! sorter-hal: hardware abstraction layer for the sorting line
//!
//! One capability interface ([`HardwareBackend`]) with two compiled-in
//! variants. [`SimulatedBackend`] emulates the rig with sleeps and a toggling
//! sensor; [`RealBackend`] drives sysfs GPIO, sysfs PWM servos and a camera.
//! [`select_backend`] probes the platform once and falls back to simulation.

pub mod backend;
pub mod real;
pub mod selector;
pub mod simulated;

pub use backend::HardwareBackend;
pub use real::RealBackend;
pub use selector::{select_backend, BackendProvider, SelectedBackend};
pub use simulated::SimulatedBackend;
