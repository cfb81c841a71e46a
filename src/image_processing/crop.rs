//! Crop geometry planning.
//!
//! For aspect-locked profiles the source rectangle always has the canvas
//! aspect ratio (within integer rounding) and is scaled uniformly onto the
//! whole canvas. Other profiles keep the clamped face crop as is and letterbox
//! it on a white canvas.

use super::face_detection::FaceRegion;
use crate::profile::ComplianceProfile;

/// Smallest short side a planned crop is given when the image is large enough.
pub const MIN_CROP_SIDE: u32 = 200;

/// Crop short side from which integer rounding stays within [`ASPECT_TOLERANCE`].
pub const ASPECT_EXACT_SIDE: u32 = 100;

/// Maximum relative deviation of a crop's aspect ratio from the canvas.
pub const ASPECT_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }

    pub fn contains(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// How one source image is turned into one profile canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CropPlan {
    /// Region of the (orientation-corrected) source image to sample.
    pub source: PixelRect,
    /// Destination canvas size.
    pub canvas: (u32, u32),
    /// Where the scaled source lands on the canvas.
    pub placement: PixelRect,
    /// Canvas pixels per source pixel.
    pub scale: f64,
    /// Canvas areas outside `placement` are filled with white.
    pub fill_background: bool,
    /// `false` when the centred fallback was used.
    pub face_used: bool,
}

/// Relative deviation of the plan's source aspect ratio from the profile's.
pub fn aspect_error(plan: &CropPlan, profile: &ComplianceProfile) -> f64 {
    (plan.source.aspect_ratio() / profile.aspect_ratio() - 1.0).abs()
}

/// Plan the crop of an image of `image_size` for `profile`.
///
/// `face` is the primary face, already clipped to the image. Without one the
/// plan is a centred crop of maximal size at the canvas aspect ratio.
pub fn plan_crop(
    image_size: (u32, u32),
    face: Option<&FaceRegion>,
    profile: &ComplianceProfile,
) -> CropPlan {
    let (img_w, img_h) = (image_size.0.max(1), image_size.1.max(1));
    let canvas = profile.pixel_size();
    let ratio = profile.aspect_ratio();

    let Some(face) = face else {
        return full_canvas_plan(centered_crop(img_w, img_h, ratio), canvas, false);
    };

    let margins = &profile.margins;
    let fw = face.width as f64;
    let fh = face.height as f64;
    let left = face.x as f64 - margins.side * fw;
    let right = face.x as f64 + fw + margins.side * fw;
    let top = face.y as f64 - margins.top * fh;
    let bottom = face.y as f64 + fh + margins.bottom * fh;

    if !profile.aspect_lock {
        return letterbox_plan(clamp_box(left, top, right, bottom, img_w, img_h), canvas);
    }

    let center_x = (left + right) / 2.0;
    let center_y = (top + bottom) / 2.0;
    let mut width = (right - left).max(1.0);
    let mut height = (bottom - top).max(1.0);

    // Grow the short side to the target aspect
    if width / height < ratio {
        width = height * ratio;
    } else {
        height = width / ratio;
    }

    let short = width.min(height);
    if short < MIN_CROP_SIDE as f64 {
        let k = MIN_CROP_SIDE as f64 / short;
        width *= k;
        height *= k;
    }

    // Shrink only if the rectangle cannot fit at all
    let shrink = (img_w as f64 / width).min(img_h as f64 / height);
    if shrink < 1.0 {
        width *= shrink;
        height *= shrink;
    }

    let bound_w = (width.round() as u32).clamp(1, img_w);
    let bound_h = (height.round() as u32).clamp(1, img_h);
    let (w, h) = fit_aspect(bound_w, bound_h, ratio);

    let x = shift_into(center_x - w as f64 / 2.0, w, img_w);
    let y = shift_into(center_y - h as f64 / 2.0, h, img_h);

    full_canvas_plan(PixelRect::new(x, y, w, h), canvas, true)
}

/// Largest centred rectangle of the given aspect ratio inside the image.
pub fn centered_crop(img_w: u32, img_h: u32, ratio: f64) -> PixelRect {
    let (w, h) = fit_aspect(img_w, img_h, ratio);
    PixelRect::new((img_w - w) / 2, (img_h - h) / 2, w, h)
}

/// Largest integer size of the given aspect ratio within `max_w` x `max_h`.
fn fit_aspect(max_w: u32, max_h: u32, ratio: f64) -> (u32, u32) {
    let max_w = max_w.max(1);
    let max_h = max_h.max(1);
    if max_w as f64 / max_h as f64 > ratio {
        let w = ((max_h as f64 * ratio).round() as u32).clamp(1, max_w);
        (w, max_h)
    } else {
        let h = ((max_w as f64 / ratio).round() as u32).clamp(1, max_h);
        (max_w, h)
    }
}

/// Position a span of `len` starting near `start`, moved inside `0..limit`.
fn shift_into(start: f64, len: u32, limit: u32) -> u32 {
    let max_start = limit.saturating_sub(len) as f64;
    start.round().clamp(0.0, max_start) as u32
}

fn clamp_box(left: f64, top: f64, right: f64, bottom: f64, img_w: u32, img_h: u32) -> PixelRect {
    let x0 = left.floor().clamp(0.0, (img_w - 1) as f64) as u32;
    let y0 = top.floor().clamp(0.0, (img_h - 1) as f64) as u32;
    let x1 = (right.ceil().clamp(0.0, img_w as f64) as u32).max(x0 + 1);
    let y1 = (bottom.ceil().clamp(0.0, img_h as f64) as u32).max(y0 + 1);
    PixelRect::new(x0, y0, x1 - x0, y1 - y0)
}

fn full_canvas_plan(source: PixelRect, canvas: (u32, u32), face_used: bool) -> CropPlan {
    CropPlan {
        source,
        canvas,
        placement: PixelRect::new(0, 0, canvas.0, canvas.1),
        scale: canvas.0 as f64 / source.width as f64,
        fill_background: false,
        face_used,
    }
}

fn letterbox_plan(source: PixelRect, canvas: (u32, u32)) -> CropPlan {
    let (cw, ch) = canvas;
    let scale = (cw as f64 / source.width as f64).min(ch as f64 / source.height as f64);
    let pw = ((source.width as f64 * scale).round() as u32).clamp(1, cw);
    let ph = ((source.height as f64 * scale).round() as u32).clamp(1, ch);
    let placement = PixelRect::new((cw - pw) / 2, (ch - ph) / 2, pw, ph);

    CropPlan {
        source,
        canvas,
        placement,
        scale,
        fill_background: pw != cw || ph != ch,
        face_used: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileCatalog;

    /// Deterministic pseudo-random sequence for geometry sweeps.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u32) -> u32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) % bound as u64) as u32
        }
    }

    #[test]
    fn test_e_okul_reference_face() {
        let catalog = ProfileCatalog::builtin();
        let e_okul = catalog.get("e_okul").unwrap();
        let face = FaceRegion::new(400, 300, 300, 400, 0.9);

        let plan = plan_crop((1200, 1600), Some(&face), e_okul);

        assert_eq!(plan.canvas, (551, 709));
        assert_eq!(plan.source, PixelRect::new(208, 0, 684, 880));
        assert!(plan.face_used);
        assert!(!plan.fill_background);
        assert!(aspect_error(&plan, e_okul) <= ASPECT_TOLERANCE);
        // The face itself is inside the crop
        assert!(plan.source.contains(&PixelRect::new(400, 300, 300, 400)));
    }

    #[test]
    fn test_fallback_is_centered_and_maximal() {
        let catalog = ProfileCatalog::builtin();
        let e_okul = catalog.get("e_okul").unwrap();

        let plan = plan_crop((1200, 1600), None, e_okul);
        assert!(!plan.face_used);
        assert_eq!(plan.source.width, 1200);
        assert_eq!(plan.source.height, 1544);
        assert_eq!(plan.source.x, 0);
        assert_eq!(plan.source.y, 28);

        let passport = catalog.get("passport").unwrap();
        let plan = plan_crop((1600, 900), None, passport);
        assert_eq!(plan.source, PixelRect::new(350, 0, 900, 900));
    }

    #[test]
    fn test_crop_shifts_before_shrinking() {
        let catalog = ProfileCatalog::builtin();
        let passport = catalog.get("passport").unwrap();
        // Face in the top-left corner: the crop slides right/down, keeping its size
        let face = FaceRegion::new(0, 0, 200, 200, 0.9);
        let plan = plan_crop((1000, 1000), Some(&face), passport);
        assert_eq!((plan.source.x, plan.source.y), (0, 0));
        assert_eq!(plan.source.width, plan.source.height);
        // Expanded box height is 200 * (1 + 0.8 + 0.4) = 440
        assert_eq!(plan.source.height, 440);
    }

    #[test]
    fn test_crop_shrinks_as_last_resort() {
        let catalog = ProfileCatalog::builtin();
        let e_okul = catalog.get("e_okul").unwrap();
        // Face fills most of a small image
        let face = FaceRegion::new(20, 50, 360, 400, 0.9);
        let plan = plan_crop((400, 500), Some(&face), e_okul);
        assert!(plan.source.fits_within(400, 500));
        assert!(plan.source.width == 400 || plan.source.height == 500);
        assert!(aspect_error(&plan, e_okul) <= ASPECT_TOLERANCE);
    }

    #[test]
    fn test_small_face_gets_minimum_crop() {
        let catalog = ProfileCatalog::builtin();
        let passport = catalog.get("passport").unwrap();
        let face = FaceRegion::new(500, 500, 20, 20, 0.9);
        let plan = plan_crop((1000, 1000), Some(&face), passport);
        assert_eq!(plan.source.width, MIN_CROP_SIDE);
        assert_eq!(plan.source.height, MIN_CROP_SIDE);
    }

    #[test]
    fn test_letterbox_for_unlocked_profile() {
        let catalog = ProfileCatalog::builtin();
        let mebbis = catalog.get("mebbis").unwrap();
        assert!(!mebbis.aspect_lock);

        // Expanded box: 100 + 2*50 = 200 wide, 100 * (1 + 0.7 + 0.9) = 260 tall
        let face = FaceRegion::new(300, 300, 100, 100, 0.9);
        let plan = plan_crop((1000, 1000), Some(&face), mebbis);
        assert_eq!(plan.source, PixelRect::new(250, 230, 200, 260));
        assert_eq!(plan.canvas, (394, 512));
        // 200x260 scaled by min(1.97, 1.969) fills the height
        assert_eq!(plan.placement.height, 512);
        assert_eq!(plan.placement.width, 394);
        assert!((plan.scale - 512.0 / 260.0).abs() < 1e-9);

        // Clamped at the image edge: narrower crop, white side bars
        let edge_face = FaceRegion::new(0, 300, 100, 100, 0.9);
        let plan = plan_crop((1000, 1000), Some(&edge_face), mebbis);
        assert_eq!(plan.source.x, 0);
        assert_eq!(plan.source.width, 150);
        assert!(plan.fill_background);
        assert_eq!(plan.placement.height, 512);
        assert!(plan.placement.width < 394);
        assert_eq!(plan.placement.x, (394 - plan.placement.width) / 2);
    }

    #[test]
    fn test_aspect_tolerance_sweep() {
        let catalog = ProfileCatalog::builtin();
        let mut rng = Lcg(42);

        for profile in catalog.iter().filter(|p| p.aspect_lock) {
            for _ in 0..300 {
                let img_w = 40 + rng.next(3000);
                let img_h = 40 + rng.next(3000);
                let fw = 1 + rng.next(img_w);
                let fh = 1 + rng.next(img_h);
                let fx = rng.next(img_w) as i32 - (fw / 4) as i32;
                let fy = rng.next(img_h) as i32 - (fh / 4) as i32;
                let face = FaceRegion::new(fx, fy, fw, fh, 0.9).clip_to(img_w, img_h);

                for candidate in [face.as_ref(), None] {
                    let plan = plan_crop((img_w, img_h), candidate, profile);
                    assert!(
                        plan.source.fits_within(img_w, img_h),
                        "{} {:?} outside {}x{}",
                        profile.name,
                        plan.source,
                        img_w,
                        img_h
                    );
                    if plan.source.width.min(plan.source.height) < ASPECT_EXACT_SIDE {
                        continue;
                    }
                    assert!(
                        aspect_error(&plan, profile) <= ASPECT_TOLERANCE,
                        "{} {:?} aspect error {}",
                        profile.name,
                        plan.source,
                        aspect_error(&plan, profile)
                    );
                }
            }
        }
    }

    #[test]
    fn test_small_source_still_gets_a_plan() {
        let catalog = ProfileCatalog::builtin();
        let e_okul = catalog.get("e_okul").unwrap();

        let plan = plan_crop((180, 240), None, e_okul);
        assert!(!plan.face_used);
        assert_eq!(plan.source, PixelRect::new(0, 4, 180, 232));
        assert!(aspect_error(&plan, e_okul) <= ASPECT_TOLERANCE);

        // A face larger than the image shrinks the crop onto the whole frame
        let face = FaceRegion::new(30, 40, 120, 150, 0.9);
        let plan = plan_crop((180, 240), Some(&face), e_okul);
        assert!(plan.face_used);
        assert!(plan.source.fits_within(180, 240));
        assert!(aspect_error(&plan, e_okul) <= ASPECT_TOLERANCE);

        // Degenerate sources are planned too, without panicking
        let plan = plan_crop((3, 2), None, e_okul);
        assert!(plan.source.fits_within(3, 2));
    }

    #[test]
    fn test_plans_are_deterministic() {
        let catalog = ProfileCatalog::builtin();
        let face = FaceRegion::new(123, 456, 321, 400, 0.8);
        for profile in catalog.iter() {
            let a = plan_crop((1500, 2000), Some(&face), profile);
            let b = plan_crop((1500, 2000), Some(&face), profile);
            assert_eq!(a, b);
        }
    }
}
