//! CSPDarknet backbones: a stem conv followed by CSP stages.
//!
//! `forward` returns the deepest selected feature map; `forward_features`
//! returns every selected stage output, named `feat1`, `feat2`, ... from
//! shallow to deep. Stages after the deepest selected one are built (so
//! checkpoints stay layout-compatible) but not evaluated.

use burn::module::{Ignored, Module};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::block::{CspStage2d, CspStage3d};
use crate::config::{feature_name, BackboneConfig, FeatureSpec};
use crate::conv::{ConvBnMish2d, ConvBnMish3d, DarknetConvOptions, L2Regularized};
use crate::error::ModelError;

/// A named intermediate tensor handed to downstream heads.
#[derive(Debug, Clone)]
pub struct FeatureMap<B: Backend, const D: usize> {
    pub name: String,
    pub tensor: Tensor<B, D>,
}

/// Feature maps ordered shallow to deep.
#[derive(Debug, Clone)]
pub struct FeatureMaps<B: Backend, const D: usize> {
    maps: Vec<FeatureMap<B, D>>,
}

impl<B: Backend, const D: usize> FeatureMaps<B, D> {
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<B, D>> {
        self.maps.iter().find(|m| m.name == name).map(|m| &m.tensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMap<B, D>> {
        self.maps.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.maps.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn into_tensors(self) -> Vec<Tensor<B, D>> {
        self.maps.into_iter().map(|m| m.tensor).collect()
    }
}

impl<B: Backend, const D: usize> IntoIterator for FeatureMaps<B, D> {
    type Item = FeatureMap<B, D>;
    type IntoIter = std::vec::IntoIter<FeatureMap<B, D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.maps.into_iter()
    }
}

fn log_plan(kind: &str, cfg: &BackboneConfig) {
    tracing::debug!(
        kind,
        in_channels = cfg.in_channels,
        stem = cfg.stem_filters,
        stages = cfg.stages.len(),
        "building backbone"
    );
    for (idx, (stage, input)) in cfg.stages.iter().zip(cfg.stage_inputs()).enumerate() {
        tracing::debug!(
            stage = idx,
            input,
            filters = stage.filters,
            blocks = stage.blocks,
            narrow = stage.all_narrow,
            stride = cfg.stage_stride(idx),
            "csp stage"
        );
    }
}

/// CSPDarknet over `[batch, channels, height, width]` images.
#[derive(Module, Debug)]
pub struct CspDarknet2d<B: Backend> {
    stem: ConvBnMish2d<B>,
    stages: Vec<CspStage2d<B>>,
    config: Ignored<BackboneConfig>,
}

impl<B: Backend> CspDarknet2d<B> {
    pub fn new(cfg: &BackboneConfig, device: &B::Device) -> Result<Self, ModelError> {
        cfg.validate()?;
        log_plan("2d", cfg);

        let params = cfg.stage_params();
        let stem = ConvBnMish2d::new(
            cfg.in_channels,
            DarknetConvOptions::square(cfg.stem_filters, cfg.stem_kernel)
                .with_weight_decay(cfg.weight_decay),
            device,
        );
        let stages = cfg
            .stages
            .iter()
            .zip(cfg.stage_inputs())
            .map(|(stage, input)| CspStage2d::new(input, stage, params, device))
            .collect();

        Ok(Self {
            stem,
            stages,
            config: Ignored(cfg.clone()),
        })
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config.0
    }

    pub fn feature_specs(&self) -> Vec<FeatureSpec> {
        self.config.0.feature_specs()
    }

    /// Deepest selected feature map.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let last = self.config.0.deepest_feature_stage();
        let mut x = self.stem.forward(input);
        for stage in self.stages.iter().take(last + 1) {
            x = stage.forward(x);
        }
        x
    }

    pub fn forward_features(&self, input: Tensor<B, 4>) -> FeatureMaps<B, 4> {
        let cfg = &self.config.0;
        let last = cfg.deepest_feature_stage();
        let mut maps = Vec::with_capacity(cfg.feature_stages.len());
        let mut x = self.stem.forward(input);
        for (idx, stage) in self.stages.iter().enumerate().take(last + 1) {
            x = stage.forward(x);
            if cfg.feature_stages.contains(&idx) {
                maps.push(FeatureMap {
                    name: feature_name(maps.len()),
                    tensor: x.clone(),
                });
            }
        }
        FeatureMaps { maps }
    }
}

impl<B: Backend> L2Regularized<B> for CspDarknet2d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        self.stages
            .iter()
            .fold(self.stem.l2_penalty(), |acc, stage| acc + stage.l2_penalty())
    }
}

/// CSPDarknet over `[batch, channels, depth, height, width]` volumes.
#[derive(Module, Debug)]
pub struct CspDarknet3d<B: Backend> {
    stem: ConvBnMish3d<B>,
    stages: Vec<CspStage3d<B>>,
    config: Ignored<BackboneConfig>,
}

impl<B: Backend> CspDarknet3d<B> {
    pub fn new(cfg: &BackboneConfig, device: &B::Device) -> Result<Self, ModelError> {
        cfg.validate()?;
        log_plan("3d", cfg);

        let params = cfg.stage_params();
        let stem = ConvBnMish3d::new(
            cfg.in_channels,
            DarknetConvOptions::square(cfg.stem_filters, cfg.stem_kernel)
                .with_weight_decay(cfg.weight_decay),
            device,
        );
        let stages = cfg
            .stages
            .iter()
            .zip(cfg.stage_inputs())
            .map(|(stage, input)| CspStage3d::new(input, stage, params, device))
            .collect();

        Ok(Self {
            stem,
            stages,
            config: Ignored(cfg.clone()),
        })
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config.0
    }

    pub fn feature_specs(&self) -> Vec<FeatureSpec> {
        self.config.0.feature_specs()
    }

    /// Deepest selected feature map (`feat2` for the default layout).
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let last = self.config.0.deepest_feature_stage();
        let mut x = self.stem.forward(input);
        for stage in self.stages.iter().take(last + 1) {
            x = stage.forward(x);
        }
        x
    }

    pub fn forward_features(&self, input: Tensor<B, 5>) -> FeatureMaps<B, 5> {
        let cfg = &self.config.0;
        let last = cfg.deepest_feature_stage();
        let mut maps = Vec::with_capacity(cfg.feature_stages.len());
        let mut x = self.stem.forward(input);
        for (idx, stage) in self.stages.iter().enumerate().take(last + 1) {
            x = stage.forward(x);
            if cfg.feature_stages.contains(&idx) {
                maps.push(FeatureMap {
                    name: feature_name(maps.len()),
                    tensor: x.clone(),
                });
            }
        }
        FeatureMaps { maps }
    }
}

impl<B: Backend> L2Regularized<B> for CspDarknet3d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        self.stages
            .iter()
            .fold(self.stem.l2_penalty(), |acc, stage| acc + stage.l2_penalty())
    }
}
