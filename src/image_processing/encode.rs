//! Size-budget encoding.
//!
//! With a byte budget, JPEG quality is searched: one encode at the profile
//! quality, one at [`MIN_QUALITY`], then a binary search between them. The
//! search stops after [`MAX_ENCODE_ATTEMPTS`] encodes in total and returns the
//! highest quality seen that fits. An over-budget result is never returned.
//!
//! A minimum size only ever raises quality. An output that stays below it at
//! the best quality the budget allows is still returned, flagged `undersized`.

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::JobError;
use crate::profile::OutputFormat;

pub const MIN_QUALITY: u8 = 10;
pub const MAX_ENCODE_ATTEMPTS: u32 = 8;
pub const MAX_QUALITY: u8 = 100;

/// Accepted encoded size range, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeBudget {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl SizeBudget {
    pub fn at_most(max: u64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    fn fits(&self, len: usize) -> bool {
        self.max.map_or(true, |max| len as u64 <= max)
    }

    fn is_undersized(&self, len: u64) -> bool {
        self.min.is_some_and(|min| len < min)
    }
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    /// JPEG quality used, `None` for lossless formats.
    pub quality: Option<u8>,
    pub attempts: u32,
    /// Below the budget's minimum even at the best quality that fits.
    pub undersized: bool,
}

impl EncodedImage {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn encode_with_budget(
    canvas: &RgbImage,
    format: OutputFormat,
    dpi: u32,
    quality: u8,
    budget: SizeBudget,
) -> Result<EncodedImage, JobError> {
    let mut encoded = match format {
        OutputFormat::Png => {
            let bytes = encode_png(canvas)?;
            check_budget(&bytes, budget.max)?;
            EncodedImage {
                bytes,
                quality: None,
                attempts: 1,
                undersized: false,
            }
        }
        OutputFormat::Jpeg => {
            let fitted = encode_jpeg_with_budget(canvas, dpi, quality.max(MIN_QUALITY), budget.max)?;
            if budget.is_undersized(fitted.len()) {
                raise_to_minimum(canvas, dpi, fitted, budget)?
            } else {
                fitted
            }
        }
    };
    encoded.undersized = budget.is_undersized(encoded.len());
    Ok(encoded)
}

fn encode_jpeg_with_budget(
    canvas: &RgbImage,
    dpi: u32,
    quality: u8,
    budget: Option<u64>,
) -> Result<EncodedImage, JobError> {
    let first = encode_jpeg(canvas, quality, dpi)?;
    let Some(budget) = budget else {
        return Ok(EncodedImage {
            bytes: first,
            quality: Some(quality),
            attempts: 1,
            undersized: false,
        });
    };
    if first.len() as u64 <= budget {
        return Ok(EncodedImage {
            bytes: first,
            quality: Some(quality),
            attempts: 1,
            undersized: false,
        });
    }
    if quality == MIN_QUALITY {
        return Err(JobError::BudgetUnmet {
            achieved: first.len() as u64,
            budget,
        });
    }

    let floor = encode_jpeg(canvas, MIN_QUALITY, dpi)?;
    let mut attempts = 2;
    if floor.len() as u64 > budget {
        return Err(JobError::BudgetUnmet {
            achieved: floor.len() as u64,
            budget,
        });
    }

    // `low` always fits, `high` never does
    let mut low = MIN_QUALITY;
    let mut high = quality;
    let mut best = floor;
    while attempts < MAX_ENCODE_ATTEMPTS && high - low > 1 {
        let mid = low + (high - low) / 2;
        let bytes = encode_jpeg(canvas, mid, dpi)?;
        attempts += 1;
        if bytes.len() as u64 <= budget {
            low = mid;
            best = bytes;
        } else {
            high = mid;
        }
    }

    tracing::debug!(
        "budget {} bytes met at quality {} ({} bytes, {} attempts)",
        budget,
        low,
        best.len(),
        attempts
    );

    Ok(EncodedImage {
        bytes: best,
        quality: Some(low),
        attempts,
        undersized: false,
    })
}

/// Highest quality above `fitted` that still fits the budget's maximum.
fn raise_to_minimum(
    canvas: &RgbImage,
    dpi: u32,
    fitted: EncodedImage,
    budget: SizeBudget,
) -> Result<EncodedImage, JobError> {
    let Some(start) = fitted.quality.filter(|q| *q < MAX_QUALITY) else {
        return Ok(fitted);
    };

    let top = encode_jpeg(canvas, MAX_QUALITY, dpi)?;
    let mut attempts = fitted.attempts + 1;
    if budget.fits(top.len()) {
        return Ok(EncodedImage {
            bytes: top,
            quality: Some(MAX_QUALITY),
            attempts,
            undersized: false,
        });
    }

    let mut low = start;
    let mut high = MAX_QUALITY;
    let mut best = fitted.bytes;
    while attempts < fitted.attempts + MAX_ENCODE_ATTEMPTS && high - low > 1 {
        let mid = low + (high - low) / 2;
        let bytes = encode_jpeg(canvas, mid, dpi)?;
        attempts += 1;
        if budget.fits(bytes.len()) {
            low = mid;
            best = bytes;
        } else {
            high = mid;
        }
    }

    Ok(EncodedImage {
        bytes: best,
        quality: Some(low),
        attempts,
        undersized: false,
    })
}

fn check_budget(bytes: &[u8], budget: Option<u64>) -> Result<(), JobError> {
    match budget {
        Some(budget) if bytes.len() as u64 > budget => Err(JobError::BudgetUnmet {
            achieved: bytes.len() as u64,
            budget,
        }),
        _ => Ok(()),
    }
}

/// Baseline JPEG with the DPI recorded in the JFIF header.
pub fn encode_jpeg(canvas: &RgbImage, quality: u8, dpi: u32) -> Result<Vec<u8>, JobError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder.set_pixel_density(PixelDensity::dpi(dpi.min(u16::MAX as u32) as u16));
    encoder
        .write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| JobError::Encode(e.to_string()))?;
    Ok(bytes)
}

pub fn encode_png(canvas: &RgbImage) -> Result<Vec<u8>, JobError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| JobError::Encode(e.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    /// High-entropy image so quality has a visible effect on size.
    fn noisy_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
            Rgb([(v % 256) as u8, ((v >> 8) % 256) as u8, ((v >> 16) % 256) as u8])
        })
    }

    fn jfif_density(bytes: &[u8]) -> (u8, u16) {
        let p = bytes
            .windows(5)
            .position(|w| w == b"JFIF\0")
            .expect("JFIF header");
        (bytes[p + 7], u16::from_be_bytes([bytes[p + 8], bytes[p + 9]]))
    }

    #[test]
    fn test_no_budget_single_encode() {
        let img = noisy_image(200, 250);
        let encoded = encode_with_budget(&img, OutputFormat::Jpeg, 400, 95, SizeBudget::default()).unwrap();
        assert_eq!(encoded.attempts, 1);
        assert_eq!(encoded.quality, Some(95));
        assert_eq!(jfif_density(&encoded.bytes), (1, 400));

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 250));
    }

    #[test]
    fn test_generous_budget_keeps_profile_quality() {
        let img = noisy_image(100, 100);
        let encoded =
            encode_with_budget(&img, OutputFormat::Jpeg, 300, 90, SizeBudget::at_most(10 * 1024 * 1024)).unwrap();
        assert_eq!(encoded.quality, Some(90));
        assert_eq!(encoded.attempts, 1);
    }

    #[test]
    fn test_tight_budget_is_met() {
        let img = noisy_image(551, 709);
        let at_min = encode_jpeg(&img, MIN_QUALITY, 400).unwrap().len() as u64;
        let at_max = encode_jpeg(&img, 95, 400).unwrap().len() as u64;
        assert!(at_min < at_max);

        let budget = (at_min + at_max) / 2;
        let encoded = encode_with_budget(&img, OutputFormat::Jpeg, 400, 95, SizeBudget::at_most(budget)).unwrap();
        assert!(encoded.len() <= budget);
        assert!(encoded.attempts <= MAX_ENCODE_ATTEMPTS);
        let q = encoded.quality.unwrap();
        assert!(q > MIN_QUALITY && q < 95);

        // Same input, same bytes
        let again = encode_with_budget(&img, OutputFormat::Jpeg, 400, 95, SizeBudget::at_most(budget)).unwrap();
        assert_eq!(encoded.bytes, again.bytes);
    }

    #[test]
    fn test_budget_exactly_at_minimum_quality() {
        let img = noisy_image(300, 300);
        let at_min = encode_jpeg(&img, MIN_QUALITY, 300).unwrap().len() as u64;
        let encoded = encode_with_budget(&img, OutputFormat::Jpeg, 300, 95, SizeBudget::at_most(at_min)).unwrap();
        assert!(encoded.len() <= at_min);
    }

    #[test]
    fn test_unreachable_budget_reports_achieved_size() {
        let img = noisy_image(551, 709);
        let at_min = encode_jpeg(&img, MIN_QUALITY, 400).unwrap().len() as u64;
        let err = encode_with_budget(&img, OutputFormat::Jpeg, 400, 95, SizeBudget::at_most(1024)).unwrap_err();
        match err {
            JobError::BudgetUnmet { achieved, budget } => {
                assert_eq!(budget, 1024);
                assert_eq!(achieved, at_min);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_png_budget() {
        let img = noisy_image(64, 64);
        let encoded = encode_with_budget(&img, OutputFormat::Png, 300, 95, SizeBudget::default()).unwrap();
        assert_eq!(encoded.quality, None);
        assert!(image::load_from_memory(&encoded.bytes).is_ok());

        let err = encode_with_budget(&img, OutputFormat::Png, 300, 95, SizeBudget::at_most(1024)).unwrap_err();
        assert!(matches!(err, JobError::BudgetUnmet { .. }));
    }

    #[test]
    fn test_minimum_raises_quality() {
        let img = noisy_image(300, 300);
        let at_60 = encode_jpeg(&img, 60, 300).unwrap().len() as u64;
        let at_max = encode_jpeg(&img, MAX_QUALITY, 300).unwrap().len() as u64;
        assert!(at_60 < at_max);

        let budget = SizeBudget {
            min: Some(at_60 + 1),
            max: None,
        };
        let encoded = encode_with_budget(&img, OutputFormat::Jpeg, 300, 60, budget).unwrap();
        assert_eq!(encoded.quality, Some(MAX_QUALITY));
        assert!(!encoded.undersized);

        // The maximum still wins over the minimum
        let capped = SizeBudget {
            min: Some(at_max),
            max: Some(at_max - 1),
        };
        let encoded = encode_with_budget(&img, OutputFormat::Jpeg, 300, 60, capped).unwrap();
        assert!(encoded.len() < at_max);
        let q = encoded.quality.unwrap();
        assert!((60..MAX_QUALITY).contains(&q));
        assert!(encoded.undersized);
    }

    #[test]
    fn test_unreachable_minimum_is_flagged() {
        let flat = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
        let budget = SizeBudget {
            min: Some(1024 * 1024),
            max: Some(2 * 1024 * 1024),
        };
        let encoded = encode_with_budget(&flat, OutputFormat::Jpeg, 300, 85, budget).unwrap();
        assert!(encoded.undersized);
        assert_eq!(encoded.quality, Some(MAX_QUALITY));

        let png = encode_with_budget(&flat, OutputFormat::Png, 300, 85, budget).unwrap();
        assert!(png.undersized);
    }
}
