//! sorter-eye: vision for the sorting line
//!
//! - [`VisionBackend`]: image in, labeled boxes out
//! - [`annotate`]: draws detections onto a copy of the raw frame
//! - [`encode_frame`]: JPEG + base64 for the live stream
//! - [`load_vision_backend`]: picks the ONNX detector when built with the
//!   `onnx` feature and a model is present, otherwise a backend that always
//!   reports itself unavailable

pub mod annotation;
pub mod backend;
pub mod encoding;
pub mod loader;
pub mod preprocess;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use annotation::annotate;
pub use backend::{run_blocking, UnavailableVision, VisionBackend};
pub use encoding::encode_frame;
pub use loader::load_vision_backend;
