pub mod config;
pub mod generation;

// Re-export vision types for convenience
pub use lensfit_vision::{
    composite, gate, landmarks, pipeline, placement, pose, yunet, EncodedImage, FacePresence,
    LandmarkProvider, LazyProvider, OverlaySpec, TryOn, TryOnError, TryOnErrorKind, TryOnOptions,
    TryOnReport, YuNet,
};

use config::Config;

/// Try-on pipeline backed by YuNet. The model is loaded on first use.
pub fn build_pipeline(cfg: &Config) -> TryOn<impl LandmarkProvider> {
    let model_path = cfg.model_path.clone();
    let (candidate, nms) = (cfg.candidate_threshold, cfg.nms_threshold);
    let provider = LazyProvider::new(move || {
        Ok(YuNet::from_file(&model_path)?.with_thresholds(candidate, nms))
    });

    TryOn::with_options(
        provider,
        TryOnOptions {
            min_confidence: cfg.min_confidence,
            opacity: cfg.opacity,
        },
    )
}
