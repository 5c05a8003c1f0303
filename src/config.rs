use anyhow::{Context, Result};
use directories::ProjectDirs;
use lensfit_vision::{
    model::DETECTOR_MODEL_FILE, yunet, DEFAULT_MIN_CONFIDENCE, DEFAULT_OPACITY,
    DEFAULT_SIZE_MULTIPLIER,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", "lensfit"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match std::env::var_os("LENSFIT_CONFIG") {
    Some(p) => PathBuf::from(p),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("lensfit.toml")),
});

pub static DEFAULT_MODEL_PATH: Lazy<PathBuf> = Lazy::new(|| {
    PROJECT_DIRS
        .as_ref()
        .map(|d| d.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
        .join(DETECTOR_MODEL_FILE)
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_path: PathBuf,
    pub min_confidence: f32,
    pub candidate_threshold: f32,
    pub nms_threshold: f32,
    pub size_multiplier: f32,
    pub opacity: f32,
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: DEFAULT_MODEL_PATH.clone(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            candidate_threshold: yunet::DEFAULT_CANDIDATE_THRESHOLD,
            nms_threshold: yunet::DEFAULT_NMS_THRESHOLD,
            size_multiplier: DEFAULT_SIZE_MULTIPLIER,
            opacity: DEFAULT_OPACITY,
            debounce_ms: 400,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("{name} must be within [0, 1], got {v}");
            }
            Ok(())
        };
        unit("min_confidence", self.min_confidence)?;
        unit("candidate_threshold", self.candidate_threshold)?;
        unit("nms_threshold", self.nms_threshold)?;
        unit("opacity", self.opacity)?;
        if !self.size_multiplier.is_finite() || self.size_multiplier <= 0.0 {
            anyhow::bail!(
                "size_multiplier must be positive, got {}",
                self.size_multiplier
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
