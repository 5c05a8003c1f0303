use image::DynamicImage;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};
use crate::geometry::Point;

/// Eye contours produced by a landmark provider. Left/right follow the
/// provider's labeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(left_eye: Vec<Point>, right_eye: Vec<Point>) -> Self {
        Self {
            left_eye,
            right_eye,
        }
    }

    /// 68-point iBUG layout: points 36..=41 outline the left eye, 42..=47 the right.
    pub fn from_68_points(points: &[Point]) -> Result<Self> {
        if points.len() != 68 {
            return Err(VisionError::InvalidLandmarks(
                "68-point layout requires exactly 68 points",
            ));
        }
        Ok(Self::new(points[36..42].to_vec(), points[42..48].to_vec()))
    }

    /// 5-point layout `[x1,y1, ..., x5,y5]`: left eye, right eye, nose, mouth corners.
    pub fn from_5_points(flat: &[f32; 10]) -> Self {
        Self::new(
            vec![Point::new(flat[0], flat[1])],
            vec![Point::new(flat[2], flat[3])],
        )
    }
}

/// A single face found by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: LandmarkSet,
}

/// Something that can turn a photo into at most one face detection.
///
/// Implementations own whatever model state they need. `Ok(None)` means
/// no face was found and is not an error.
pub trait LandmarkProvider: Send + Sync {
    fn detect_face(&self, image: &DynamicImage) -> Result<Option<FaceDetection>>;
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for Box<P> {
    fn detect_face(&self, image: &DynamicImage) -> Result<Option<FaceDetection>> {
        (**self).detect_face(image)
    }
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for std::sync::Arc<P> {
    fn detect_face(&self, image: &DynamicImage) -> Result<Option<FaceDetection>> {
        (**self).detect_face(image)
    }
}

/// Defers building a provider until first use and keeps it for the
/// lifetime of the wrapper. A failed initialization is not cached.
pub struct LazyProvider<P, F> {
    cell: OnceCell<P>,
    init: F,
}

impl<P, F> LazyProvider<P, F>
where
    P: LandmarkProvider,
    F: Fn() -> anyhow::Result<P> + Send + Sync,
{
    pub fn new(init: F) -> Self {
        Self {
            cell: OnceCell::new(),
            init,
        }
    }

    /// Run initialization now instead of on the first detection.
    pub fn initialize(&self) -> Result<&P> {
        self.cell.get_or_try_init(|| {
            log::debug!("initializing landmark provider");
            (self.init)().map_err(VisionError::provider)
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<P, F> LandmarkProvider for LazyProvider<P, F>
where
    P: LandmarkProvider,
    F: Fn() -> anyhow::Result<P> + Send + Sync,
{
    fn detect_face(&self, image: &DynamicImage) -> Result<Option<FaceDetection>> {
        self.initialize()?.detect_face(image)
    }
}
