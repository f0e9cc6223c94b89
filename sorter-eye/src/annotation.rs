//! Drawing detections onto frames

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use sorter_core::{Detection, Frame, FrameTag};

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([230, 25, 75]),
    Rgb([255, 225, 25]),
    Rgb([0, 130, 200]),
    Rgb([245, 130, 48]),
    Rgb([145, 30, 180]),
    Rgb([70, 240, 240]),
];

const BOX_THICKNESS: i32 = 2;

/// Stable color per label
pub fn label_color(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[hash as usize % PALETTE.len()]
}

/// Copy of `frame` with every detection box drawn, tagged `Annotated`.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut canvas: RgbImage = frame.image().clone();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let bbox = &detection.bbox;
        // clip to the image, skip boxes entirely outside it
        let x1 = bbox.x1.max(0);
        let y1 = bbox.y1.max(0);
        let x2 = bbox.x2.min(width as i32);
        let y2 = bbox.y2.min(height as i32);
        if x1 >= x2 || y1 >= y2 {
            continue;
        }

        let color = label_color(&detection.class_label);
        for inset in 0..BOX_THICKNESS {
            let w = x2 - x1 - 2 * inset;
            let h = y2 - y1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    frame.derive(FrameTag::Annotated, canvas)
}
