//! Darknet convolution factories and the Conv → BatchNorm → Mish unit.
//!
//! Darknet convolutions share three defaults:
//! - kernels start from `Normal(0, 0.02)`;
//! - every unit carries an L2 weight-decay factor (default `5e-4`);
//! - padding is `valid` when every stride is 2 and `same` otherwise, so a
//!   stride-2 conv after a one-sided zero pad halves the spatial extent exactly.
//!
//! Explicit options always win over these defaults.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, Conv3d, Conv3dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, PaddingConfig3d};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::activation::Mish;

pub const DEFAULT_WEIGHT_DECAY: f64 = 5e-4;
pub const KERNEL_INIT_STD: f64 = 0.02;

// Keras BatchNormalization defaults; Burn's momentum is the weight of the new
// batch statistic, so decay 0.99 becomes 0.01.
const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 0.01;

/// Spatial padding mode for a Darknet convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
}

/// Options for a Darknet convolution with `N` spatial dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DarknetConvOptions<const N: usize> {
    pub filters: usize,
    pub kernel: [usize; N],
    pub strides: [usize; N],
    pub weight_decay: f64,
    /// `None` lets the factory decide: plain convs use a bias, BN units do not.
    pub use_bias: Option<bool>,
    /// `None` applies the stride rule.
    pub padding: Option<Padding>,
}

impl<const N: usize> DarknetConvOptions<N> {
    pub fn new(filters: usize, kernel: [usize; N]) -> Self {
        Self {
            filters,
            kernel,
            strides: [1; N],
            weight_decay: DEFAULT_WEIGHT_DECAY,
            use_bias: None,
            padding: None,
        }
    }

    /// Cubic/square kernel shorthand.
    pub fn square(filters: usize, kernel: usize) -> Self {
        Self::new(filters, [kernel; N])
    }

    pub fn with_strides(mut self, strides: [usize; N]) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = Some(use_bias);
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn resolved_padding(&self) -> Padding {
        self.padding.unwrap_or(if self.strides.iter().all(|s| *s == 2) {
            Padding::Valid
        } else {
            Padding::Same
        })
    }

    fn bias_or(&self, default: bool) -> bool {
        self.use_bias.unwrap_or(default)
    }
}

fn kernel_initializer() -> Initializer {
    Initializer::Normal {
        mean: 0.0,
        std: KERNEL_INIT_STD,
    }
}

/// Build a 2D Darknet convolution reading `in_channels` channels.
pub fn darknet_conv2d<B: Backend>(
    in_channels: usize,
    opts: &DarknetConvOptions<2>,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = match opts.resolved_padding() {
        Padding::Same => PaddingConfig2d::Same,
        Padding::Valid => PaddingConfig2d::Valid,
    };
    Conv2dConfig::new([in_channels, opts.filters], opts.kernel)
        .with_stride(opts.strides)
        .with_padding(padding)
        .with_bias(opts.bias_or(true))
        .with_initializer(kernel_initializer())
        .init(device)
}

/// Build a 3D Darknet convolution reading `in_channels` channels.
pub fn darknet_conv3d<B: Backend>(
    in_channels: usize,
    opts: &DarknetConvOptions<3>,
    device: &B::Device,
) -> Conv3d<B> {
    let padding = match opts.resolved_padding() {
        Padding::Same => PaddingConfig3d::Same,
        Padding::Valid => PaddingConfig3d::Valid,
    };
    Conv3dConfig::new([in_channels, opts.filters], opts.kernel)
        .with_stride(opts.strides)
        .with_padding(padding)
        .with_bias(opts.bias_or(true))
        .with_initializer(kernel_initializer())
        .init(device)
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B> {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
        .init(device)
}

/// Modules that contribute an L2 weight penalty to the training loss.
pub trait L2Regularized<B: Backend> {
    /// `sum(weight_decay * sum(kernel^2))` over every conv kernel in the module.
    fn l2_penalty(&self) -> Tensor<B, 1>;
}

fn kernel_l2<B: Backend, const D: usize>(kernel: Tensor<B, D>, weight_decay: f64) -> Tensor<B, 1> {
    kernel.powf_scalar(2.0).sum().mul_scalar(weight_decay)
}

/// Conv2d (no bias) → BatchNorm → Mish.
#[derive(Module, Debug)]
pub struct ConvBnMish2d<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
    activation: Mish,
    filters: usize,
    weight_decay: f64,
}

impl<B: Backend> ConvBnMish2d<B> {
    pub fn new(in_channels: usize, opts: DarknetConvOptions<2>, device: &B::Device) -> Self {
        let opts = DarknetConvOptions {
            use_bias: Some(opts.bias_or(false)),
            ..opts
        };
        Self {
            conv: darknet_conv2d(in_channels, &opts, device),
            norm: batch_norm(opts.filters, device),
            activation: Mish::new(),
            filters: opts.filters,
            weight_decay: opts.weight_decay,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.filters
    }

    pub fn has_bias(&self) -> bool {
        self.conv.bias.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

impl<B: Backend> L2Regularized<B> for ConvBnMish2d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.conv.weight.val(), self.weight_decay)
    }
}

/// Conv3d (no bias) → BatchNorm → Mish.
#[derive(Module, Debug)]
pub struct ConvBnMish3d<B: Backend> {
    conv: Conv3d<B>,
    norm: BatchNorm<B>,
    activation: Mish,
    filters: usize,
    weight_decay: f64,
}

impl<B: Backend> ConvBnMish3d<B> {
    pub fn new(in_channels: usize, opts: DarknetConvOptions<3>, device: &B::Device) -> Self {
        let opts = DarknetConvOptions {
            use_bias: Some(opts.bias_or(false)),
            ..opts
        };
        Self {
            conv: darknet_conv3d(in_channels, &opts, device),
            norm: batch_norm(opts.filters, device),
            activation: Mish::new(),
            filters: opts.filters,
            weight_decay: opts.weight_decay,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.filters
    }

    pub fn has_bias(&self) -> bool {
        self.conv.bias.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

impl<B: Backend> L2Regularized<B> for ConvBnMish3d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        kernel_l2(self.conv.weight.val(), self.weight_decay)
    }
}
