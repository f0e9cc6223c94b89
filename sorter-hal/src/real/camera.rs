//! USB camera capture

use sorter_core::config::CameraConfig;
#[cfg(not(feature = "opencv"))]
use sorter_core::SorterError;
use sorter_core::{Frame, Result};

#[cfg(feature = "opencv")]
mod imp {
    use super::*;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
    };
    use parking_lot::Mutex;
    use sorter_core::SorterError;
    use std::sync::Arc;
    use tracing::info;

    pub struct Camera {
        index: u32,
        capture: Arc<Mutex<Option<VideoCapture>>>,
    }

    impl Camera {
        pub fn open(config: &CameraConfig) -> Result<Self> {
            let fail = |e: opencv::Error| {
                SorterError::CaptureFailed(format!("camera {}: {}", config.index, e))
            };
            let mut capture = VideoCapture::new(config.index as i32, CAP_ANY).map_err(fail)?;
            if !capture.is_opened().map_err(fail)? {
                return Err(SorterError::CaptureFailed(format!(
                    "camera {} failed to open",
                    config.index
                )));
            }
            capture.set(CAP_PROP_FRAME_WIDTH, config.width as f64).map_err(fail)?;
            capture.set(CAP_PROP_FRAME_HEIGHT, config.height as f64).map_err(fail)?;
            info!("Camera {} opened at {}x{}", config.index, config.width, config.height);

            Ok(Self {
                index: config.index,
                capture: Arc::new(Mutex::new(Some(capture))),
            })
        }

        pub async fn capture(&self) -> Result<Frame> {
            let capture = self.capture.clone();
            let index = self.index;
            tokio::task::spawn_blocking(move || {
                let mut guard = capture.lock();
                let cap = guard
                    .as_mut()
                    .ok_or_else(|| SorterError::CaptureFailed(format!("camera {} released", index)))?;
                let fail = |e: opencv::Error| SorterError::CaptureFailed(e.to_string());

                let mut bgr = Mat::default();
                if !cap.read(&mut bgr).map_err(fail)? || bgr.empty() {
                    return Err(SorterError::CaptureFailed(format!(
                        "camera {} returned no frame",
                        index
                    )));
                }
                let mut rgb = Mat::default();
                imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(fail)?;

                let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
                let bytes = rgb.data_bytes().map_err(fail)?.to_vec();
                let image = RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
                    SorterError::CaptureFailed("frame buffer size mismatch".to_string())
                })?;
                Ok(Frame::raw(image))
            })
            .await
            .map_err(|e| SorterError::CaptureFailed(format!("capture task failed: {}", e)))?
        }

        pub fn release(&self) {
            if let Some(mut cap) = self.capture.lock().take() {
                let _ = cap.release();
            }
        }
    }
}

#[cfg(not(feature = "opencv"))]
mod imp {
    use super::*;

    /// Placeholder when built without camera support
    pub struct Camera;

    impl Camera {
        pub fn open(config: &CameraConfig) -> Result<Self> {
            Err(SorterError::CaptureFailed(format!(
                "camera {} unavailable: built without the `opencv` feature",
                config.index
            )))
        }

        pub async fn capture(&self) -> Result<Frame> {
            Err(SorterError::CaptureFailed("camera support not compiled in".to_string()))
        }

        pub fn release(&self) {}
    }
}

pub use imp::Camera;
