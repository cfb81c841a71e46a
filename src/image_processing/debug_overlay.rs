use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::crop::{CropPlan, PixelRect};
use super::face_detection::FaceRegion;

pub const FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const CROP_COLOR: Rgb<u8> = Rgb([0, 200, 0]);

/// Source image with the primary face (red) and the sampled crop (green) outlined.
pub fn draw_overlay(image: &RgbImage, face: Option<&FaceRegion>, plan: &CropPlan) -> RgbImage {
    let mut overlay = image.clone();
    let thickness = line_thickness(image.width(), image.height());

    draw_frame(&mut overlay, &plan.source, thickness, CROP_COLOR);
    if let Some(face) = face.and_then(|f| f.clip_to(image.width(), image.height())) {
        let rect = PixelRect::new(face.x.max(0) as u32, face.y.max(0) as u32, face.width, face.height);
        draw_frame(&mut overlay, &rect, thickness, FACE_COLOR);
    }
    overlay
}

fn line_thickness(width: u32, height: u32) -> u32 {
    (width.min(height) / 300).clamp(1, 8)
}

/// Nested hollow rectangles, drawn inwards from `rect`.
fn draw_frame(image: &mut RgbImage, rect: &PixelRect, thickness: u32, color: Rgb<u8>) {
    for inset in 0..thickness {
        let width = rect.width.saturating_sub(inset * 2);
        let height = rect.height.saturating_sub(inset * 2);
        if width == 0 || height == 0 {
            break;
        }
        let outline = Rect::at((rect.x + inset) as i32, (rect.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, outline, color);
    }
}
