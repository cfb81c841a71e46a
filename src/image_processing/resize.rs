use anyhow::Result;
use fast_image_resize::{images::Image, ResizeOptions, Resizer};
use image::{imageops, Rgb, RgbImage};
use std::num::NonZeroU32;

use super::crop::CropPlan;

pub const BACKGROUND_WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Render a crop plan into the final profile canvas.
///
/// The source rectangle is cut out, scaled uniformly into the placement
/// rectangle and, when the plan asks for it, pasted on a pure white canvas.
pub fn render_plan(img: &RgbImage, plan: &CropPlan) -> Result<RgbImage> {
    let src = plan.source;
    let cropped = crop_image(img, src.x, src.y, src.width, src.height)?;

    let placement = plan.placement;
    let scaled = resize_image(&cropped, placement.width, placement.height)?;

    let (canvas_w, canvas_h) = plan.canvas;
    if !plan.fill_background && scaled.dimensions() == plan.canvas {
        return Ok(scaled);
    }

    let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, BACKGROUND_WHITE);
    imageops::replace(&mut canvas, &scaled, placement.x as i64, placement.y as i64);
    Ok(canvas)
}

/// Crop an image to specified dimensions
pub fn crop_image(img: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> Result<RgbImage> {
    let (img_width, img_height) = img.dimensions();

    if width == 0 || height == 0 || x + width > img_width || y + height > img_height {
        return Err(anyhow::anyhow!(
            "Crop dimensions exceed image bounds: crop({},{},{}x{}) on {}x{} image",
            x,
            y,
            width,
            height,
            img_width,
            img_height
        ));
    }

    Ok(imageops::crop_imm(img, x, y, width, height).to_image())
}

/// Resize an image to exact dimensions using Lanczos3 convolution
pub fn resize_image(img: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    let (src_width, src_height) = img.dimensions();

    if src_width == width && src_height == height {
        return Ok(img.clone());
    }

    let src_width_nz =
        NonZeroU32::new(src_width).ok_or_else(|| anyhow::anyhow!("Source width is zero"))?;
    let src_height_nz =
        NonZeroU32::new(src_height).ok_or_else(|| anyhow::anyhow!("Source height is zero"))?;
    let dst_width_nz =
        NonZeroU32::new(width).ok_or_else(|| anyhow::anyhow!("Target width is zero"))?;
    let dst_height_nz =
        NonZeroU32::new(height).ok_or_else(|| anyhow::anyhow!("Target height is zero"))?;

    let src_image = Image::from_vec_u8(
        src_width_nz.get(),
        src_height_nz.get(),
        img.as_raw().clone(),
        fast_image_resize::PixelType::U8x3,
    )?;

    let mut dst_image = Image::new(
        dst_width_nz.get(),
        dst_height_nz.get(),
        fast_image_resize::PixelType::U8x3,
    );

    let mut resizer = Resizer::new();
    resizer.resize(&src_image, &mut dst_image, Some(&ResizeOptions::default()))?;

    RgbImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("Resized buffer does not match {}x{}", width, height))
}
