use image::DynamicImage;

use crate::error::Result;
use crate::landmarks::{FaceDetection, LandmarkProvider};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Why a photo did or did not pass the face check.
#[derive(Debug, Clone, PartialEq)]
pub enum FacePresence {
    Present(FaceDetection),
    LowConfidence(f32),
    NoFace,
    Undecodable,
}

impl FacePresence {
    pub fn is_present(&self) -> bool {
        matches!(self, FacePresence::Present(_))
    }

    pub fn into_detection(self) -> Option<FaceDetection> {
        match self {
            FacePresence::Present(d) => Some(d),
            _ => None,
        }
    }
}

/// Run the provider on a decoded image and apply the confidence threshold.
/// The score must be strictly greater than `min_confidence`.
pub fn check_image<P: LandmarkProvider + ?Sized>(
    provider: &P,
    image: &DynamicImage,
    min_confidence: f32,
) -> Result<FacePresence> {
    let presence = match provider.detect_face(image)? {
        None => FacePresence::NoFace,
        Some(d) if d.score > min_confidence => FacePresence::Present(d),
        Some(d) => FacePresence::LowConfidence(d.score),
    };
    log::debug!("face check (min {min_confidence}): {presence:?}");
    Ok(presence)
}

/// Like [`check_image`] but starting from encoded bytes. A photo that
/// fails to decode is reported as [`FacePresence::Undecodable`].
pub fn check_face<P: LandmarkProvider + ?Sized>(
    provider: &P,
    photo: &[u8],
    min_confidence: f32,
) -> Result<FacePresence> {
    match image::load_from_memory(photo) {
        Ok(image) => check_image(provider, &image, min_confidence),
        Err(e) => {
            log::debug!("face check: photo did not decode: {e}");
            Ok(FacePresence::Undecodable)
        }
    }
}

/// True iff the photo decodes and holds a face scored above `min_confidence`.
/// Provider failures count as "no face".
pub fn has_face<P: LandmarkProvider + ?Sized>(
    provider: &P,
    photo: &[u8],
    min_confidence: f32,
) -> bool {
    match check_face(provider, photo, min_confidence) {
        Ok(presence) => presence.is_present(),
        Err(e) => {
            log::warn!("face check failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisionError;
    use crate::geometry::Point;
    use crate::landmarks::LandmarkSet;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    struct Scripted(Result<Option<f32>>);

    impl LandmarkProvider for Scripted {
        fn detect_face(&self, _image: &DynamicImage) -> Result<Option<FaceDetection>> {
            match &self.0 {
                Ok(score) => Ok(score.map(|score| FaceDetection {
                    bbox: [0.0, 0.0, 10.0, 10.0],
                    score,
                    landmarks: LandmarkSet::new(
                        vec![Point::new(2.0, 4.0)],
                        vec![Point::new(8.0, 4.0)],
                    ),
                })),
                Err(_) => Err(VisionError::provider("model failed to load")),
            }
        }
    }

    fn png() -> Vec<u8> {
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(12, 12))
            .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
            .unwrap();
        data
    }

    #[test]
    fn test_confident_face_passes() {
        assert!(has_face(&Scripted(Ok(Some(0.9))), &png(), DEFAULT_MIN_CONFIDENCE));
    }

    #[test]
    fn test_low_confidence_rejected() {
        let provider = Scripted(Ok(Some(0.4)));
        assert!(!has_face(&provider, &png(), 0.5));
        assert_eq!(
            check_face(&provider, &png(), 0.5).unwrap(),
            FacePresence::LowConfidence(0.4)
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!has_face(&Scripted(Ok(Some(0.5))), &png(), 0.5));
    }

    #[test]
    fn test_no_detection() {
        let provider = Scripted(Ok(None));
        assert!(!has_face(&provider, &png(), 0.5));
        assert_eq!(check_face(&provider, &png(), 0.5).unwrap(), FacePresence::NoFace);
    }

    #[test]
    fn test_undecodable_photo() {
        let provider = Scripted(Ok(Some(0.99)));
        assert!(!has_face(&provider, b"\x00\x01garbage", 0.5));
        assert_eq!(
            check_face(&provider, b"\x00\x01garbage", 0.5).unwrap(),
            FacePresence::Undecodable
        );
    }

    #[test]
    fn test_provider_failure_is_false() {
        let provider = Scripted(Err(VisionError::InvalidLandmarks("unused")));
        assert!(!has_face(&provider, &png(), 0.5));
        assert!(matches!(
            check_face(&provider, &png(), 0.5),
            Err(VisionError::Provider(_))
        ));
    }
}
