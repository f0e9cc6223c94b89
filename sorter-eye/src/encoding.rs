//! Frame encoding for the live stream

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use sorter_core::{Frame, Result, SorterError};

/// JPEG-encode a frame and wrap it in standard base64.
pub fn encode_frame(frame: &Frame, quality: u8) -> Result<String> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(frame.image())
        .map_err(|e| SorterError::Serialization(format!("jpeg encoding failed: {}", e)))?;
    Ok(STANDARD.encode(&buffer))
}
