use std::path::{Path, PathBuf};

use clap::ValueEnum;
use darknet_models::{BackboneConfig, ModelError, StageConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_NAME: &str = "darknet-tools.toml";
pub const CONFIG_ENV: &str = "DARKNET_TOOLS_CONFIG";

/// Which backbone variant to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Dims {
    #[serde(rename = "2d")]
    #[value(name = "2d")]
    Image,
    #[serde(rename = "3d")]
    #[value(name = "3d")]
    Volume,
}

impl Dims {
    pub fn spatial_axes(self) -> usize {
        match self {
            Dims::Image => 2,
            Dims::Volume => 3,
        }
    }

    pub fn default_backbone(self) -> BackboneConfig {
        match self {
            Dims::Image => BackboneConfig::cspdarknet53(),
            Dims::Volume => BackboneConfig::cspdarknet3d(),
        }
    }

    /// `[batch, spatial...]` used when no input shape is configured.
    pub fn default_input_shape(self) -> Vec<usize> {
        match self {
            Dims::Image => vec![1, 256, 256],
            Dims::Volume => vec![1, 64, 64, 64],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("input_shape {shape:?} needs batch plus {axes} spatial extents, all non-zero")]
    InputShape { shape: Vec<usize>, axes: usize },
    #[error("input extent {extent} shrinks below kernel {kernel} before stage {stage}")]
    InputTooSmall {
        extent: usize,
        stage: usize,
        kernel: usize,
    },
    #[error("invalid backbone: {0}")]
    Backbone(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub dims: Dims,
    /// `[batch, spatial...]`; the channel axis comes from the backbone.
    pub input_shape: Vec<usize>,
    pub backbone: BackboneConfig,
    pub checkpoint: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::for_dims(Dims::Image)
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProbeConfigFile {
    dims: Option<Dims>,
    input_shape: Option<Vec<usize>>,
    checkpoint: Option<String>,
    backbone: Option<BackboneSection>,
}

#[derive(Debug, Deserialize, Default)]
struct BackboneSection {
    in_channels: Option<usize>,
    stem_filters: Option<usize>,
    stem_kernel: Option<usize>,
    kernel1: Option<usize>,
    kernel2: Option<usize>,
    weight_decay: Option<f64>,
    stages: Option<Vec<StageConfig>>,
    feature_stages: Option<Vec<usize>>,
}

impl BackboneSection {
    fn apply(self, base: BackboneConfig) -> BackboneConfig {
        BackboneConfig {
            in_channels: self.in_channels.unwrap_or(base.in_channels),
            stem_filters: self.stem_filters.unwrap_or(base.stem_filters),
            stem_kernel: self.stem_kernel.unwrap_or(base.stem_kernel),
            kernel1: self.kernel1.unwrap_or(base.kernel1),
            kernel2: self.kernel2.unwrap_or(base.kernel2),
            weight_decay: self.weight_decay.unwrap_or(base.weight_decay),
            stages: self.stages.unwrap_or(base.stages),
            feature_stages: self.feature_stages.unwrap_or(base.feature_stages),
        }
    }
}

impl ProbeConfig {
    pub fn for_dims(dims: Dims) -> Self {
        Self {
            dims,
            input_shape: dims.default_input_shape(),
            backbone: dims.default_backbone(),
            checkpoint: None,
        }
    }

    /// Load from `$DARKNET_TOOLS_CONFIG`, then `darknet-tools.toml`, then defaults.
    /// Unreadable or invalid files are reported and replaced by defaults.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no tools config; using defaults");
            return Self::default();
        }
        match Self::from_path(&path).and_then(|cfg| cfg.validate().map(|_| cfg)) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(%err, "ignoring tools config");
                Self::default()
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ProbeConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ProbeConfigFile) -> Self {
        let dims = file.dims.unwrap_or(Dims::Image);
        let backbone = file
            .backbone
            .unwrap_or_default()
            .apply(dims.default_backbone());
        ProbeConfig {
            dims,
            input_shape: file
                .input_shape
                .unwrap_or_else(|| dims.default_input_shape()),
            backbone,
            checkpoint: file
                .checkpoint
                .filter(|p| !p.trim().is_empty())
                .map(|p| expand_path(&p)),
        }
    }

    /// Switch variant, resetting the backbone and input shape to that variant's defaults.
    pub fn with_dims(self, dims: Dims) -> Self {
        if dims == self.dims {
            return self;
        }
        Self {
            checkpoint: self.checkpoint,
            ..Self::for_dims(dims)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backbone.validate()?;
        let axes = self.dims.spatial_axes();
        if self.input_shape.len() != axes + 1 || self.input_shape.contains(&0) {
            return Err(ConfigError::InputShape {
                shape: self.input_shape.clone(),
                axes,
            });
        }
        let deepest = self.backbone.deepest_feature_stage();
        let kernel = self.backbone.kernel2;
        for &extent in &self.input_shape[1..] {
            // Each stage sees the previous extent plus one leading pad row.
            let mut current = extent;
            for stage in 0..=deepest {
                if current + 1 < kernel {
                    return Err(ConfigError::InputTooSmall {
                        extent,
                        stage,
                        kernel,
                    });
                }
                current = (current + 1 - kernel) / 2 + 1;
            }
        }
        let stride = self.backbone.stage_stride(deepest);
        for extent in &self.input_shape[1..] {
            if extent % stride != 0 {
                tracing::warn!(
                    extent,
                    stride,
                    "input extent is not a multiple of the deepest feature stride; feature maps will round down"
                );
            }
        }
        Ok(())
    }

    /// Full tensor shape `[batch, channels, spatial...]`.
    pub fn tensor_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.input_shape.len() + 1);
        if let Some((batch, spatial)) = self.input_shape.split_first() {
            shape.push(*batch);
            shape.push(self.backbone.in_channels);
            shape.extend_from_slice(spatial);
        }
        shape
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_substitutes_known_keys() {
        std::env::set_var("DARKNET_TOOLS_TEST_ROOT", "/data");
        assert_eq!(
            expand_env("${DARKNET_TOOLS_TEST_ROOT}/ckpt.bin"),
            "/data/ckpt.bin"
        );
        assert_eq!(
            expand_env("${DARKNET_TOOLS_TEST_MISSING}/x"),
            "${DARKNET_TOOLS_TEST_MISSING}/x"
        );
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn tensor_shape_inserts_channels() {
        let cfg = ProbeConfig::for_dims(Dims::Volume);
        assert_eq!(cfg.tensor_shape(), vec![1, 1, 64, 64, 64]);
    }

    #[test]
    fn input_shape_must_match_dims() {
        let mut cfg = ProbeConfig::default();
        cfg.input_shape = vec![1, 32, 32, 32];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InputShape { axes: 2, .. })
        ));
    }

    #[test]
    fn input_must_survive_every_downsample() {
        let mut cfg = ProbeConfig::default();
        // Five stages, deepest feature at stage 4: 16 -> 8 -> 4 -> 2 -> 1 -> (too small).
        cfg.input_shape = vec![1, 16, 64];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InputTooSmall {
                extent: 16,
                stage: 4,
                kernel: 3
            })
        ));

        cfg.input_shape = vec![1, 32, 64];
        assert!(cfg.validate().is_ok());
    }
}
