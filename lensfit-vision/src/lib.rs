pub mod composite;
pub mod error;
pub mod gate;
pub mod geometry;
pub mod landmarks;
pub mod model;
pub mod pipeline;
pub mod placement;
pub mod pose;
pub mod yunet;

// Re-export commonly used types
pub use composite::{composite, EncodedImage, Photo, DEFAULT_OPACITY};
pub use error::VisionError;
pub use gate::{has_face, FacePresence, DEFAULT_MIN_CONFIDENCE};
pub use geometry::Point;
pub use landmarks::{FaceDetection, LandmarkProvider, LandmarkSet, LazyProvider};
pub use pipeline::{TryOn, TryOnError, TryOnErrorKind, TryOnOptions, TryOnReport};
pub use placement::{
    compute_placement, OverlaySpec, PlacementRect, DEFAULT_SIZE_MULTIPLIER,
    RECOMMENDED_SIZE_RANGE,
};
pub use pose::{estimate_pose, EyePose};
pub use yunet::YuNet;
