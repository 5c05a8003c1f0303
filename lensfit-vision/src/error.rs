use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("invalid landmarks: {0}")]
    InvalidLandmarks(&'static str),

    #[error("degenerate eye geometry: inter-eye distance is {distance}")]
    DegenerateGeometry { distance: f32 },

    #[error("size multiplier must be a positive finite number, got {0}")]
    InvalidSizeMultiplier(f32),

    #[error("image decode error: {0}")]
    ImageDecode(#[source] image::ImageError),

    #[error("overlay image has zero size ({width}x{height})")]
    EmptyOverlay { width: u32, height: u32 },

    #[error("image encoding error: {0}")]
    Encoding(#[source] image::ImageError),

    #[error("landmark provider failed: {0}")]
    Provider(#[source] BoxError),
}

impl VisionError {
    pub fn provider(err: impl Into<BoxError>) -> Self {
        Self::Provider(err.into())
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
