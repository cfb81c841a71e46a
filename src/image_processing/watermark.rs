use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fmt;
use std::path::Path;

use super::crop::PixelRect;

const MIN_FONT_PX: u32 = 20;
const EDGE_MARGIN: u32 = 20;
const BOX_PADDING: u32 = 10;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fonts tried in order when no font file is given.
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
    "/mnt/c/Windows/Fonts/arial.ttf",
];

/// Text stamped into the bottom-right corner of every output, on a darkened box.
pub struct Watermark {
    text: String,
    font: FontVec,
}

impl fmt::Debug for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watermark")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

impl Watermark {
    /// `None` when the text is blank.
    pub fn new(text: &str, font: FontVec) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            font,
        })
    }

    /// Load `font_path`, or the first available system font.
    pub fn load(text: &str, font_path: Option<&Path>) -> Result<Option<Self>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let font = match font_path {
            Some(path) => load_font_file(path)?,
            None => load_fallback_font()?,
        };
        Ok(Self::new(text, font))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn apply(&self, canvas: &mut RgbImage) {
        let (width, height) = canvas.dimensions();
        let font_px = font_size_for(width, height);
        let scale = PxScale::from(font_px as f32);
        let text_dims = text_size(scale, &self.font, &self.text);

        let Some(layout) = layout_box((width, height), text_dims) else {
            return;
        };
        shade_rect(canvas, &layout.background);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            layout.text_x,
            layout.text_y,
            scale,
            &self.font,
            &self.text,
        );
    }
}

pub fn font_size_for(width: u32, height: u32) -> u32 {
    (width.min(height) / 30).max(MIN_FONT_PX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkLayout {
    pub background: PixelRect,
    pub text_x: i32,
    pub text_y: i32,
}

/// Place text of `text_dims` near the bottom-right corner. `None` when the
/// padded box does not fit on the canvas.
pub fn layout_box(canvas: (u32, u32), text_dims: (u32, u32)) -> Option<WatermarkLayout> {
    let (cw, ch) = canvas;
    let (tw, th) = text_dims;
    let box_w = tw + 2 * BOX_PADDING;
    let box_h = th + 2 * BOX_PADDING;
    if box_w > cw || box_h > ch {
        return None;
    }

    // Shrink the edge margin on canvases too small for it
    let margin_x = EDGE_MARGIN.min((cw - box_w) / 2);
    let margin_y = EDGE_MARGIN.min((ch - box_h) / 2);
    let box_x = cw - box_w - margin_x;
    let box_y = ch - box_h - margin_y;

    Some(WatermarkLayout {
        background: PixelRect::new(box_x, box_y, box_w, box_h),
        text_x: (box_x + BOX_PADDING) as i32,
        text_y: (box_y + BOX_PADDING) as i32,
    })
}

/// Blend the area with 50% black.
pub fn shade_rect(canvas: &mut RgbImage, rect: &PixelRect) {
    let (width, height) = canvas.dimensions();
    for y in rect.y..rect.bottom().min(height) {
        for x in rect.x..rect.right().min(width) {
            let pixel = canvas.get_pixel_mut(x, y);
            for channel in pixel.0.iter_mut() {
                *channel /= 2;
            }
        }
    }
}

fn load_font_file(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read font file: {}", path.display()))?;
    FontVec::try_from_vec(data)
        .with_context(|| format!("Failed to parse font file: {}", path.display()))
}

fn load_fallback_font() -> Result<FontVec> {
    for candidate in FALLBACK_FONTS {
        let path = Path::new(candidate);
        if path.is_file() {
            if let Ok(font) = load_font_file(path) {
                tracing::debug!("watermark font: {}", candidate);
                return Ok(font);
            }
        }
    }
    Err(anyhow::anyhow!(
        "No usable font found for the watermark; pass one with --watermark-font"
    ))
}
