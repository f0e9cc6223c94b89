//! Image preparation ahead of inference

use image::{imageops, RgbImage};

/// 3x3 high-boost kernel, weights sum to 1
pub const SHARPEN_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

pub fn sharpen(image: &RgbImage) -> RgbImage {
    imageops::filter3x3(image, &SHARPEN_KERNEL)
}

/// Resize to the square model input and lay out as normalized CHW floats.
pub fn to_chw_tensor(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * size + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    data
}
