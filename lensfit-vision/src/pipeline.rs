use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::composite::{self, EncodedImage, Photo, DEFAULT_OPACITY};
use crate::error::VisionError;
use crate::gate::{self, FacePresence, DEFAULT_MIN_CONFIDENCE};
use crate::landmarks::{FaceDetection, LandmarkProvider};
use crate::placement::{self, OverlaySpec, PlacementRect};
use crate::pose::{self, EyePose};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TryOnOptions {
    pub min_confidence: f32,
    pub opacity: f32,
}

impl Default for TryOnOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            opacity: DEFAULT_OPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TryOnErrorKind {
    NoFace,
    LowConfidence { score: f32 },
    InvalidLandmarks,
    DegenerateGeometry,
    InvalidInput,
    Decode,
    Encode,
    Provider,
}

impl fmt::Display for TryOnErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryOnErrorKind::NoFace => write!(f, "no face detected"),
            TryOnErrorKind::LowConfidence { score } => {
                write!(f, "face detected with low confidence ({score:.3})")
            }
            TryOnErrorKind::InvalidLandmarks => write!(f, "invalid landmarks"),
            TryOnErrorKind::DegenerateGeometry => write!(f, "degenerate eye geometry"),
            TryOnErrorKind::InvalidInput => write!(f, "invalid input"),
            TryOnErrorKind::Decode => write!(f, "image could not be decoded"),
            TryOnErrorKind::Encode => write!(f, "composite could not be encoded"),
            TryOnErrorKind::Provider => write!(f, "landmark provider failed"),
        }
    }
}

/// Single error type for the whole try-on chain. `kind` says what went
/// wrong, `source` carries the underlying failure when there is one.
#[derive(Error, Debug)]
#[error("try-on failed: {kind}")]
pub struct TryOnError {
    kind: TryOnErrorKind,
    #[source]
    source: Option<VisionError>,
}

impl TryOnError {
    fn new(kind: TryOnErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> TryOnErrorKind {
        self.kind
    }

    pub fn vision_error(&self) -> Option<&VisionError> {
        self.source.as_ref()
    }

    /// No face, or a face below the confidence threshold. The user should retake the photo.
    pub fn is_no_face(&self) -> bool {
        matches!(
            self.kind,
            TryOnErrorKind::NoFace | TryOnErrorKind::LowConfidence { .. }
        )
    }

    /// Only provider failures (model loading, inference) may go away on retry.
    pub fn is_retryable(&self) -> bool {
        self.kind == TryOnErrorKind::Provider
    }
}

impl From<VisionError> for TryOnError {
    fn from(err: VisionError) -> Self {
        let kind = match &err {
            VisionError::InvalidLandmarks(_) => TryOnErrorKind::InvalidLandmarks,
            VisionError::DegenerateGeometry { .. } => TryOnErrorKind::DegenerateGeometry,
            VisionError::InvalidSizeMultiplier(_) | VisionError::EmptyOverlay { .. } => {
                TryOnErrorKind::InvalidInput
            }
            VisionError::ImageDecode(_) => TryOnErrorKind::Decode,
            VisionError::Encoding(_) => TryOnErrorKind::Encode,
            VisionError::Provider(_) => TryOnErrorKind::Provider,
        };
        Self {
            kind,
            source: Some(err),
        }
    }
}

/// Everything computed on the way to a composite.
#[derive(Debug, Clone, Serialize)]
pub struct TryOnReport {
    pub detection: FaceDetection,
    pub pose: EyePose,
    pub placement: PlacementRect,
    #[serde(skip)]
    pub image: EncodedImage,
}

/// Face check followed by pose → placement → composite.
///
/// Holds no per-run state, so one instance can serve concurrent callers.
pub struct TryOn<P> {
    provider: P,
    options: TryOnOptions,
}

impl<P: LandmarkProvider> TryOn<P> {
    pub fn new(provider: P) -> Self {
        Self::with_options(provider, TryOnOptions::default())
    }

    pub fn with_options(provider: P, options: TryOnOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn options(&self) -> &TryOnOptions {
        &self.options
    }

    pub fn has_face(&self, photo: &[u8]) -> bool {
        gate::has_face(&self.provider, photo, self.options.min_confidence)
    }

    pub fn check_face(&self, photo: &[u8]) -> Result<FacePresence, VisionError> {
        gate::check_face(&self.provider, photo, self.options.min_confidence)
    }

    pub fn try_on(
        &self,
        photo: &[u8],
        overlay: &[u8],
        size_multiplier: f32,
    ) -> Result<EncodedImage, TryOnError> {
        self.render(photo, overlay, size_multiplier)
            .map(|report| report.image)
    }

    pub fn render(
        &self,
        photo: &[u8],
        overlay: &[u8],
        size_multiplier: f32,
    ) -> Result<TryOnReport, TryOnError> {
        let photo = Photo::decode(photo)?;
        let overlay = OverlaySpec::decode(overlay)?;
        self.render_decoded(&photo, &overlay, size_multiplier)
    }

    pub fn render_decoded(
        &self,
        photo: &Photo,
        overlay: &OverlaySpec,
        size_multiplier: f32,
    ) -> Result<TryOnReport, TryOnError> {
        let detection =
            match gate::check_image(&self.provider, &photo.image, self.options.min_confidence)? {
                FacePresence::Present(d) => d,
                FacePresence::LowConfidence(score) => {
                    return Err(TryOnError::new(TryOnErrorKind::LowConfidence { score }))
                }
                FacePresence::NoFace | FacePresence::Undecodable => {
                    return Err(TryOnError::new(TryOnErrorKind::NoFace))
                }
            };

        let pose = pose::estimate_pose(&detection.landmarks)?;
        let placement = placement::compute_placement(&pose, overlay, size_multiplier)?;
        log::debug!(
            "placing {}x{} overlay at ({:.1}, {:.1}) size {:.1}x{:.1} rot {:.2}deg",
            overlay.native_width,
            overlay.native_height,
            placement.x,
            placement.y,
            placement.width,
            placement.height,
            placement.rotation_degrees
        );

        let image = composite::composite_photo(photo, overlay, &placement, self.options.opacity)?;

        Ok(TryOnReport {
            detection,
            pose,
            placement,
            image,
        })
    }
}
