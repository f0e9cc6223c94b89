//! Vision backend selection

use crate::backend::{UnavailableVision, VisionBackend};
use sorter_core::config::VisionConfig;
use std::sync::Arc;
use tracing::warn;

/// Load the configured detector. Never fails: when no model can be used the
/// returned backend reports `InferenceUnavailable` on every call, and the
/// engine treats the cycle as fail-open.
pub fn load_vision_backend(config: &VisionConfig) -> Arc<dyn VisionBackend> {
    if !config.model_path.exists() {
        let reason = format!("model file {:?} not found", config.model_path);
        warn!("Vision disabled: {}", reason);
        return Arc::new(UnavailableVision::new(reason));
    }
    load_model(config)
}

#[cfg(feature = "onnx")]
fn load_model(config: &VisionConfig) -> Arc<dyn VisionBackend> {
    match crate::yolo::YoloDetector::load(config) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            warn!("Vision disabled: {}", e);
            Arc::new(UnavailableVision::new(e.to_string()))
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn load_model(config: &VisionConfig) -> Arc<dyn VisionBackend> {
    let reason = format!(
        "model {:?} present but built without the `onnx` feature",
        config.model_path
    );
    warn!("Vision disabled: {}", reason);
    Arc::new(UnavailableVision::new(reason))
}
