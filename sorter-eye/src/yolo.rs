//! YOLO defect detector on ONNX Runtime

use crate::backend::{run_blocking, VisionBackend};
use crate::preprocess::{sharpen, to_chw_tensor};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use sorter_core::config::VisionConfig;
use sorter_core::{BoundingBox, Detection, Frame, Result, SorterError};
use std::sync::Arc;
use tracing::{debug, info};

fn ort_error(context: &str, e: impl std::fmt::Display) -> SorterError {
    SorterError::InferenceUnavailable(format!("{}: {}", context, e))
}

/// Raw candidate before suppression
#[derive(Debug, Clone)]
struct Candidate {
    class_id: usize,
    score: f32,
    bbox: BoundingBox,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct YoloDetector {
    session: Arc<Mutex<Session>>,
    class_names: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(config: &VisionConfig) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| ort_error("failed to create session builder", e))?
            .commit_from_file(&config.model_path)
            .map_err(|e| ort_error("failed to load model", e))?;

        info!(
            "YOLO model loaded from {:?} ({} classes)",
            config.model_path,
            config.class_names.len()
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            class_names: config.class_names.clone(),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn infer(&self, frame: &Frame) -> Result<Vec<Candidate>> {
        let size = self.input_size as usize;
        let sharpened = sharpen(frame.image());
        let input = Tensor::from_array((
            [1usize, 3, size, size],
            to_chw_tensor(&sharpened, self.input_size).into_boxed_slice(),
        ))
        .map_err(|e| ort_error("failed to build input tensor", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ort_error("inference failed", e))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ort_error("failed to read output tensor", e))?;

        // [1, 4 + classes, anchors]
        if shape.len() != 3 || shape[1] < 5 {
            return Err(SorterError::InferenceUnavailable(format!(
                "unexpected output shape {:?}",
                &shape[..]
            )));
        }
        let rows = shape[1] as usize;
        let anchors = shape[2] as usize;
        let classes = rows - 4;
        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_id, score) = (0..classes)
                .map(|c| (c, data[(4 + c) * anchors + i]))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < self.confidence_threshold {
                continue;
            }

            let cx = data[i] * scale_x;
            let cy = data[anchors + i] * scale_y;
            let w = data[2 * anchors + i] * scale_x;
            let h = data[3 * anchors + i] * scale_y;
            let x1 = (cx - w / 2.0).max(0.0) as i32;
            let y1 = (cy - h / 2.0).max(0.0) as i32;
            let x2 = ((cx + w / 2.0) as i32).min(frame.width() as i32);
            let y2 = ((cy + h / 2.0) as i32).min(frame.height() as i32);
            if let Ok(bbox) = BoundingBox::new(x1, y1, x2, y2) {
                candidates.push(Candidate {
                    class_id,
                    score: score.clamp(0.0, 1.0),
                    bbox,
                });
            }
        }
        Ok(candidates)
    }

    fn label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

/// Greedy per-class non-maximum suppression
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[async_trait]
impl VisionBackend for YoloDetector {
    fn name(&self) -> &str {
        "yolo-onnx"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let detector = self.clone();
        let frame = frame.clone();
        run_blocking(move || {
            let candidates = detector.infer(&frame)?;
            let kept = suppress(candidates, detector.iou_threshold);
            debug!("YOLO kept {} detections", kept.len());
            kept.into_iter()
                .map(|c| Detection::new(detector.label(c.class_id), c.score, c.bbox))
                .collect()
        })
        .await
    }
}
