//! Face locators that need no external detector.
use image::RgbImage;

use super::face_detection::{sort_by_confidence, FaceLocator, FaceRegion};
use crate::error::DetectorError;

/// Never finds a face, so every job takes the centred fallback crop.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFaceLocator;

impl FaceLocator for NullFaceLocator {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Returns the same regions for every image.
#[derive(Debug, Clone)]
pub struct FixedFaceLocator {
    regions: Vec<FaceRegion>,
}

impl FixedFaceLocator {
    pub fn new(mut regions: Vec<FaceRegion>) -> Self {
        sort_by_confidence(&mut regions);
        Self { regions }
    }
}

impl FaceLocator for FixedFaceLocator {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(self.regions.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingFaceLocator {
    message: String,
}

impl FailingFaceLocator {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl FaceLocator for FailingFaceLocator {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        Err(DetectorError::Reported(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    #[test]
    fn test_stub_locators() {
        let img: RgbImage = ImageBuffer::new(10, 10);
        assert!(NullFaceLocator.locate(&img).unwrap().is_empty());

        let fixed = FixedFaceLocator::new(vec![
            FaceRegion::new(0, 0, 5, 5, 0.4),
            FaceRegion::new(1, 1, 5, 5, 0.8),
        ]);
        let regions = fixed.locate(&img).unwrap();
        assert_eq!(regions[0].confidence, 0.8);

        assert!(FailingFaceLocator::new("boom").locate(&img).is_err());
    }
}
