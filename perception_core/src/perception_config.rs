//! Configuration for the auto-visibility pipeline.
//!
//! Loaded from `perception_config.json` with support for environment variable overrides.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_PERCEPTION_CONFIG: &str = include_str!("data/perception_config.json");

/// Root configuration for the perception pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub coalesce: CoalesceConfig,
    pub senses: SenseConfig,
    pub lighting: LightingConfig,
    pub line_of_sight: LineOfSightConfig,
    pub viewport: ViewportConfig,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            coalesce: CoalesceConfig::default(),
            senses: SenseConfig::default(),
            lighting: LightingConfig::default(),
            line_of_sight: LineOfSightConfig::default(),
            viewport: ViewportConfig::default(),
        }
    }
}

impl PerceptionConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_PERCEPTION_CONFIG)
                .expect("builtin perception config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, PerceptionConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| PerceptionConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = PerceptionConfig::from_json_str(&contents)?;
        Ok(config)
    }
}

/// Batch coalescing windows, in scene-clock milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    /// How long to keep absorbing triggers before a batch runs.
    pub batch_delay_ms: u64,
    /// Quiet period after the last movement ping before a batch may run.
    pub movement_quiet_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 100,
            movement_quiet_ms: 150,
        }
    }
}

/// Sense resolution knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenseConfig {
    /// Range in feet granted by an active echolocation effect.
    pub echolocation_range_ft: f32,
    pub cache_ttl_ms: u64,
}

impl Default for SenseConfig {
    fn default() -> Self {
        Self {
            echolocation_range_ft: 40.0,
            cache_ttl_ms: 5_000,
        }
    }
}

/// Ambient light banding and the light-sample memo.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Scene darkness at or above this is dim instead of bright.
    pub dim_ambient_threshold: f32,
    /// Scene darkness at or above this is full darkness.
    pub dark_ambient_threshold: f32,
    /// Sample positions are snapped to this grid before memo lookup.
    pub position_quantize_px: f32,
    pub cache_ttl_ms: u64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            dim_ambient_threshold: 0.25,
            dark_ambient_threshold: 0.75,
            position_quantize_px: 10.0,
            cache_ttl_ms: 2_000,
        }
    }
}

/// Wall-based sight blocking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LineOfSightConfig {
    pub enabled: bool,
    /// How far footprint sample points sit inside the token square, in pixels.
    pub sample_inset_px: f32,
    /// Distinct limited walls a ray must cross before sight is blocked.
    pub limited_wall_threshold: u32,
    pub cache_ttl_ms: u64,
}

impl Default for LineOfSightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_inset_px: 2.0,
            limited_wall_threshold: 2,
            cache_ttl_ms: 2_000,
        }
    }
}

/// Restricting batches to tokens near the hosted viewport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub enabled: bool,
    pub padding_px: f32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            padding_px: 50.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum PerceptionConfigError {
    #[error("failed to parse perception config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read perception config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle for accessing the perception configuration.
#[derive(Resource, Debug, Clone)]
pub struct PerceptionConfigHandle(pub Arc<PerceptionConfig>);

impl PerceptionConfigHandle {
    pub fn new(config: Arc<PerceptionConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<PerceptionConfig> {
        Arc::clone(&self.0)
    }

    pub fn replace(&mut self, config: Arc<PerceptionConfig>) {
        self.0 = config;
    }
}

/// Metadata about the perception configuration source.
#[derive(Resource, Debug, Clone)]
pub struct PerceptionConfigMetadata {
    path: Option<PathBuf>,
}

impl PerceptionConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }
}

/// Load perception configuration from environment or default path.
pub fn load_perception_config_from_env() -> (Arc<PerceptionConfig>, PerceptionConfigMetadata) {
    let override_path = env::var("PERCEPTION_CONFIG_PATH").ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/perception_config.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path.clone()],
    };

    for path in candidates {
        match PerceptionConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "umbra::config",
                    path = %path.display(),
                    "perception_config.loaded=file"
                );
                return (Arc::new(config), PerceptionConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "umbra::config",
                    path = %path.display(),
                    error = %err,
                    "perception_config.load_failed"
                );
            }
        }
    }

    let config = PerceptionConfig::builtin();
    tracing::info!(
        target: "umbra::config",
        "perception_config.loaded=builtin"
    );
    (config, PerceptionConfigMetadata::new(None))
}
