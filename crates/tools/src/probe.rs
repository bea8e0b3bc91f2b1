//! Build a backbone from config, push a zeros batch through it, and check the
//! emitted feature maps against the documented shape contract.

use std::fmt;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use darknet_models::{
    BackboneConfig, CspDarknet2d, CspDarknet3d, FeatureMaps, FeatureSpec, L2Regularized,
};
use thiserror::Error;

use crate::checkpoint::{load_backbone_2d, load_backbone_3d, save_backbone, CheckpointError};
use crate::config::{ConfigError, Dims, ProbeConfig};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Model(#[from] darknet_models::ModelError),
    #[error("feature {name}: expected shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("config asks for a {config:?} backbone but a {backbone:?} one was built")]
    DimsMismatch { config: Dims, backbone: Dims },
    #[error("failed to read tensor back: {0}")]
    Readback(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureReport {
    pub name: String,
    pub shape: Vec<usize>,
    pub channels: usize,
    pub stride: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub dims: Dims,
    pub input_shape: Vec<usize>,
    pub num_params: usize,
    pub l2_penalty: f32,
    pub features: Vec<FeatureReport>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} backbone, input {:?}, {} params, l2 penalty {:.6}",
            self.dims, self.input_shape, self.num_params, self.l2_penalty
        )?;
        for feat in &self.features {
            writeln!(
                f,
                "  {:<6} {:>5} ch  /{:<3} {:?}",
                feat.name, feat.channels, feat.stride, feat.shape
            )?;
        }
        Ok(())
    }
}

/// Expected `[batch, channels, spatial...]` of a feature for a given input shape.
pub fn expected_shape(input_shape: &[usize], spec: &FeatureSpec) -> Vec<usize> {
    let mut shape = Vec::with_capacity(input_shape.len());
    if let Some((batch, rest)) = input_shape.split_first() {
        shape.push(*batch);
        shape.push(spec.channels);
        // Skip the channel axis of the input.
        shape.extend(rest.iter().skip(1).map(|extent| extent / spec.stride));
    }
    shape
}

fn check_features<B: Backend, const D: usize>(
    input_shape: &[usize],
    specs: Vec<FeatureSpec>,
    maps: FeatureMaps<B, D>,
) -> Result<Vec<FeatureReport>, ProbeError> {
    let mut reports = Vec::with_capacity(specs.len());
    for (spec, map) in specs.into_iter().zip(maps) {
        let got = map.tensor.dims().to_vec();
        let expected = expected_shape(input_shape, &spec);
        if got != expected {
            return Err(ProbeError::ShapeMismatch {
                name: spec.name,
                expected,
                got,
            });
        }
        tracing::debug!(feature = %spec.name, shape = ?got, "feature map ok");
        reports.push(FeatureReport {
            name: spec.name,
            shape: got,
            channels: spec.channels,
            stride: spec.stride,
        });
    }
    Ok(reports)
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32, ProbeError> {
    let values = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| ProbeError::Readback(format!("{err:?}")))?;
    values
        .first()
        .copied()
        .ok_or_else(|| ProbeError::Readback("empty scalar tensor".to_string()))
}

fn shape_array<const N: usize>(
    shape: Vec<usize>,
    cfg: &ProbeConfig,
) -> Result<[usize; N], ProbeError> {
    shape.try_into().map_err(|_| {
        ProbeError::Config(ConfigError::InputShape {
            shape: cfg.input_shape.clone(),
            axes: cfg.dims.spatial_axes(),
        })
    })
}

/// A built backbone of either variant.
#[derive(Debug)]
pub enum Backbone<B: Backend> {
    Image(CspDarknet2d<B>),
    Volume(CspDarknet3d<B>),
}

impl<B: Backend> Backbone<B> {
    /// Build from config, loading the configured checkpoint if any.
    pub fn build(cfg: &ProbeConfig, device: &B::Device) -> Result<Self, ProbeError> {
        Ok(match (cfg.dims, &cfg.checkpoint) {
            (Dims::Image, Some(path)) => {
                Self::Image(load_backbone_2d(&cfg.backbone, path, device)?)
            }
            (Dims::Image, None) => Self::Image(CspDarknet2d::new(&cfg.backbone, device)?),
            (Dims::Volume, Some(path)) => {
                Self::Volume(load_backbone_3d(&cfg.backbone, path, device)?)
            }
            (Dims::Volume, None) => Self::Volume(CspDarknet3d::new(&cfg.backbone, device)?),
        })
    }

    pub fn dims(&self) -> Dims {
        match self {
            Self::Image(_) => Dims::Image,
            Self::Volume(_) => Dims::Volume,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Self::Image(model) => model.num_params(),
            Self::Volume(model) => model.num_params(),
        }
    }

    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        match self {
            Self::Image(model) => model.l2_penalty(),
            Self::Volume(model) => model.l2_penalty(),
        }
    }

    /// Save these exact weights; returns the written path.
    pub fn save(self, path: &Path) -> Result<PathBuf, CheckpointError> {
        match self {
            Self::Image(model) => save_backbone::<B, _>(model, path),
            Self::Volume(model) => save_backbone::<B, _>(model, path),
        }
    }
}

/// Build the configured backbone, run it once, and report its feature maps.
pub fn probe<B: Backend>(cfg: &ProbeConfig, device: &B::Device) -> Result<ProbeReport, ProbeError> {
    cfg.validate()?;
    let backbone = Backbone::<B>::build(cfg, device)?;
    probe_backbone(cfg, &backbone, device)
}

/// Run an already built backbone once and report its feature maps.
pub fn probe_backbone<B: Backend>(
    cfg: &ProbeConfig,
    backbone: &Backbone<B>,
    device: &B::Device,
) -> Result<ProbeReport, ProbeError> {
    cfg.validate()?;
    if backbone.dims() != cfg.dims {
        return Err(ProbeError::DimsMismatch {
            config: cfg.dims,
            backbone: backbone.dims(),
        });
    }
    let input_shape = cfg.tensor_shape();
    tracing::info!(dims = ?cfg.dims, input = ?input_shape, "probing backbone");

    let features = match backbone {
        Backbone::Image(model) => {
            let input = Tensor::<B, 4>::zeros(shape_array::<4>(input_shape.clone(), cfg)?, device);
            check_features(&input_shape, model.feature_specs(), model.forward_features(input))?
        }
        Backbone::Volume(model) => {
            let input = Tensor::<B, 5>::zeros(shape_array::<5>(input_shape.clone(), cfg)?, device);
            check_features(&input_shape, model.feature_specs(), model.forward_features(input))?
        }
    };

    Ok(ProbeReport {
        dims: cfg.dims,
        input_shape,
        num_params: backbone.num_params(),
        l2_penalty: scalar(backbone.l2_penalty())?,
        features,
    })
}

/// Feature contract of a config without building any tensors.
pub fn contract(cfg: &BackboneConfig, input_shape: &[usize]) -> Vec<FeatureReport> {
    cfg.feature_specs()
        .into_iter()
        .map(|spec| FeatureReport {
            shape: expected_shape(input_shape, &spec),
            name: spec.name,
            channels: spec.channels,
            stride: spec.stride,
        })
        .collect()
}
