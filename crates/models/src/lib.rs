//! Burn modules for CSPDarknet53-style feature extractors.
//!
//! This crate assembles Burn layers into backbones that map an input tensor to
//! one or more feature maps for detection / segmentation heads:
//! - `CspDarknet2d`: images, `[batch, channels, height, width]`.
//! - `CspDarknet3d`: volumes, `[batch, channels, depth, height, width]`.
//!
//! Building blocks are public so heads and experiments can reuse them: the
//! `Mish` activation, Darknet conv factories (`darknet_conv2d`/`darknet_conv3d`),
//! the Conv → BatchNorm → Mish units, residual blocks, and CSP stages.
//!
//! ## Design Note
//! Weight decay is not attached to the optimizer. Each conv unit records its
//! own factor and exposes it through `L2Regularized::l2_penalty`, which the
//! training code adds to the loss.

pub mod activation;
pub mod backbone;
pub mod block;
pub mod compose;
pub mod config;
pub mod conv;
pub mod error;

pub use activation::{mish, Mish};
pub use backbone::{CspDarknet2d, CspDarknet3d, FeatureMap, FeatureMaps};
pub use block::{pad_leading_edges, CspStage2d, CspStage3d, ResBlock2d, ResBlock3d, StageParams};
pub use compose::{compose, Composed};
pub use config::{BackboneConfig, FeatureSpec, StageConfig};
pub use conv::{
    darknet_conv2d, darknet_conv3d, ConvBnMish2d, ConvBnMish3d, DarknetConvOptions,
    L2Regularized, Padding,
};
pub use error::ModelError;

pub mod prelude {
    pub use super::{
        BackboneConfig, CspDarknet2d, CspDarknet3d, FeatureMaps, FeatureSpec, L2Regularized,
        ModelError, StageConfig,
    };
}
