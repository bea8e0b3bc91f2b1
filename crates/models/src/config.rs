//! Backbone layout: stem, CSP stages, and which stage outputs become feature maps.

use serde::{Deserialize, Serialize};

use crate::block::StageParams;
use crate::conv::DEFAULT_WEIGHT_DECAY;
use crate::error::ModelError;

/// One CSP stage: output width, residual block count, and branch width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub filters: usize,
    pub blocks: usize,
    /// Branches use `filters / 2` channels when set, `filters` otherwise.
    #[serde(default = "default_narrow")]
    pub all_narrow: bool,
}

fn default_narrow() -> bool {
    true
}

impl StageConfig {
    pub fn new(filters: usize, blocks: usize) -> Self {
        Self {
            filters,
            blocks,
            all_narrow: true,
        }
    }

    pub fn wide(filters: usize, blocks: usize) -> Self {
        Self {
            filters,
            blocks,
            all_narrow: false,
        }
    }
}

/// Shape contract of one emitted feature map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub stage: usize,
    pub channels: usize,
    /// Spatial downsampling factor relative to the input.
    pub stride: usize,
}

pub fn feature_name(position: usize) -> String {
    format!("feat{}", position + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    pub in_channels: usize,
    pub stem_filters: usize,
    pub stem_kernel: usize,
    /// Kernel of the pointwise convs and the first residual conv.
    pub kernel1: usize,
    /// Kernel of the downsampling conv and the second residual conv.
    pub kernel2: usize,
    pub weight_decay: f64,
    pub stages: Vec<StageConfig>,
    /// Zero-based stage indices whose outputs are emitted, shallow to deep.
    pub feature_stages: Vec<usize>,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self::cspdarknet53()
    }
}

impl BackboneConfig {
    /// CSPDarknet53 for RGB images: features at strides 8/16/32 with 256/512/1024 channels.
    pub fn cspdarknet53() -> Self {
        Self {
            in_channels: 3,
            stem_filters: 32,
            stem_kernel: 3,
            kernel1: 1,
            kernel2: 3,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            stages: vec![
                StageConfig::wide(64, 1),
                StageConfig::new(128, 2),
                StageConfig::new(256, 8),
                StageConfig::new(512, 8),
                StageConfig::new(1024, 4),
            ],
            feature_stages: vec![2, 3, 4],
        }
    }

    /// Volumetric variant for single-channel volumes: features at strides 8/16
    /// with 32/64 channels.
    pub fn cspdarknet3d() -> Self {
        Self {
            in_channels: 1,
            stem_filters: 16,
            stem_kernel: 1,
            kernel1: 1,
            kernel2: 3,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            stages: vec![
                StageConfig::wide(16, 2),
                StageConfig::new(16, 4),
                StageConfig::new(32, 4),
                StageConfig::new(64, 4),
            ],
            feature_stages: vec![2, 3],
        }
    }

    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn stage_params(&self) -> StageParams {
        StageParams {
            kernel1: self.kernel1,
            kernel2: self.kernel2,
            weight_decay: self.weight_decay,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.in_channels == 0 {
            return Err(ModelError::ZeroInputChannels);
        }
        if self.stem_filters == 0 {
            return Err(ModelError::ZeroStemFilters);
        }
        for (name, size) in [
            ("stem_kernel", self.stem_kernel),
            ("kernel1", self.kernel1),
            ("kernel2", self.kernel2),
        ] {
            if size % 2 == 0 {
                return Err(ModelError::InvalidKernel { name, size });
            }
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ModelError::InvalidWeightDecay(self.weight_decay));
        }
        if self.stages.is_empty() {
            return Err(ModelError::NoStages);
        }
        for (stage, cfg) in self.stages.iter().enumerate() {
            if cfg.filters == 0 {
                return Err(ModelError::ZeroFilters { stage });
            }
            // The residual path always reduces to filters / 2.
            if cfg.filters < 2 {
                return Err(ModelError::TooFewFilters {
                    stage,
                    filters: cfg.filters,
                });
            }
        }
        if self.feature_stages.is_empty() {
            return Err(ModelError::NoFeatures);
        }
        if self.feature_stages.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ModelError::UnorderedFeatures(self.feature_stages.clone()));
        }
        for &index in &self.feature_stages {
            if index >= self.stages.len() {
                return Err(ModelError::FeatureOutOfRange {
                    index,
                    stages: self.stages.len(),
                });
            }
        }
        Ok(())
    }

    /// Downsampling factor after `stage` (zero-based); the stem keeps full resolution.
    pub fn stage_stride(&self, stage: usize) -> usize {
        1usize << (stage + 1)
    }

    /// Downsampling factor of the deepest stage.
    pub fn total_stride(&self) -> usize {
        self.stage_stride(self.stages.len().saturating_sub(1))
    }

    /// Deepest stage whose output is consumed; later stages are not evaluated.
    pub fn deepest_feature_stage(&self) -> usize {
        self.feature_stages
            .last()
            .copied()
            .unwrap_or(self.stages.len().saturating_sub(1))
    }

    pub fn feature_specs(&self) -> Vec<FeatureSpec> {
        self.feature_stages
            .iter()
            .enumerate()
            .filter_map(|(position, &stage)| {
                self.stages.get(stage).map(|cfg| FeatureSpec {
                    name: feature_name(position),
                    stage,
                    channels: cfg.filters,
                    stride: self.stage_stride(stage),
                })
            })
            .collect()
    }

    /// Input channel count of every stage, in order.
    pub fn stage_inputs(&self) -> Vec<usize> {
        let mut inputs = Vec::with_capacity(self.stages.len());
        let mut channels = self.stem_filters;
        for stage in &self.stages {
            inputs.push(channels);
            channels = stage.filters;
        }
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cspdarknet53_contract() {
        let cfg = BackboneConfig::cspdarknet53();
        cfg.validate().unwrap();
        let specs = cfg.feature_specs();
        let summary: Vec<_> = specs
            .iter()
            .map(|s| (s.name.as_str(), s.channels, s.stride))
            .collect();
        assert_eq!(
            summary,
            vec![("feat1", 256, 8), ("feat2", 512, 16), ("feat3", 1024, 32)]
        );
        assert_eq!(cfg.total_stride(), 32);
        assert_eq!(cfg.stage_inputs(), vec![32, 64, 128, 256, 512]);
    }

    #[test]
    fn cspdarknet3d_contract() {
        let cfg = BackboneConfig::cspdarknet3d();
        cfg.validate().unwrap();
        let summary: Vec<_> = cfg
            .feature_specs()
            .into_iter()
            .map(|s| (s.name, s.channels, s.stride))
            .collect();
        assert_eq!(
            summary,
            vec![("feat1".to_string(), 32, 8), ("feat2".to_string(), 64, 16)]
        );
        assert_eq!(cfg.deepest_feature_stage(), 3);
    }

    #[test]
    fn rejects_even_kernels() {
        let mut cfg = BackboneConfig::cspdarknet53();
        cfg.kernel2 = 4;
        assert_eq!(
            cfg.validate(),
            Err(ModelError::InvalidKernel {
                name: "kernel2",
                size: 4
            })
        );
    }

    #[test]
    fn rejects_bad_feature_selection() {
        let mut cfg = BackboneConfig::cspdarknet3d();
        cfg.feature_stages = vec![3, 2];
        assert!(matches!(
            cfg.validate(),
            Err(ModelError::UnorderedFeatures(_))
        ));

        cfg.feature_stages = vec![1, 7];
        assert_eq!(
            cfg.validate(),
            Err(ModelError::FeatureOutOfRange {
                index: 7,
                stages: 4
            })
        );

        cfg.feature_stages.clear();
        assert_eq!(cfg.validate(), Err(ModelError::NoFeatures));
    }

    #[test]
    fn rejects_degenerate_stages() {
        let mut cfg = BackboneConfig::cspdarknet53();
        cfg.stages[1].filters = 0;
        assert_eq!(cfg.validate(), Err(ModelError::ZeroFilters { stage: 1 }));

        cfg.stages.clear();
        assert_eq!(cfg.validate(), Err(ModelError::NoStages));

        let cfg = BackboneConfig::cspdarknet53().with_weight_decay(-1.0);
        assert_eq!(cfg.validate(), Err(ModelError::InvalidWeightDecay(-1.0)));

        let cfg = BackboneConfig::cspdarknet53().with_in_channels(0);
        assert_eq!(cfg.validate(), Err(ModelError::ZeroInputChannels));
    }

    #[test]
    fn stage_defaults_to_narrow_when_deserialized() {
        #[derive(Deserialize)]
        struct Wrapper {
            stage: StageConfig,
        }
        let parsed: Wrapper = toml::from_str("[stage]\nfilters = 8\nblocks = 1\n").unwrap();
        assert!(parsed.stage.all_narrow);
    }
}
