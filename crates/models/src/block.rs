//! Residual blocks and CSP (cross-stage-partial) stages.
//!
//! A CSP stage downsamples once, then splits into a shortcut branch and a
//! residual branch, and fuses the two by channel concatenation:
//!
//! ```text
//! x ─ pad ─ conv3 s2 ─┬─ conv1 (short) ───────────────────────┐
//!                     └─ conv1 (main) ─ resblock×n ─ conv1 ─── concat ─ conv1 ─ out
//! ```

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::compose::Composed;
use crate::config::StageConfig;
use crate::conv::{ConvBnMish2d, ConvBnMish3d, DarknetConvOptions, L2Regularized};

/// Channel axis in Burn's channels-first layout.
const CHANNEL_AXIS: usize = 1;

/// Zero-pad one element at the leading edge of every spatial axis.
///
/// Combined with a stride-2 `valid` conv this mirrors Darknet's top-left
/// padding and halves every even spatial extent.
pub fn pad_leading_edges<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    let device = input.device();
    let mut x = input;
    for axis in 2..D {
        let mut dims = x.dims();
        dims[axis] = 1;
        let pad = Tensor::<B, D>::zeros(dims, &device);
        x = Tensor::cat(vec![pad, x], axis);
    }
    x
}

/// Width used by the split branches of a stage.
pub fn hidden_channels(filters: usize, all_narrow: bool) -> usize {
    if all_narrow {
        filters / 2
    } else {
        filters
    }
}

/// Shared per-stage build parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    pub kernel1: usize,
    pub kernel2: usize,
    pub weight_decay: f64,
}

/// `x + conv(kernel2)(conv(kernel1)(x))` on 2D feature maps.
#[derive(Module, Debug)]
pub struct ResBlock2d<B: Backend> {
    reduce: ConvBnMish2d<B>,
    expand: ConvBnMish2d<B>,
}

impl<B: Backend> ResBlock2d<B> {
    pub fn new(filters: usize, all_narrow: bool, params: StageParams, device: &B::Device) -> Self {
        let hidden = hidden_channels(filters, all_narrow);
        let reduce = ConvBnMish2d::new(
            hidden,
            DarknetConvOptions::square(filters / 2, params.kernel1)
                .with_weight_decay(params.weight_decay),
            device,
        );
        let expand = ConvBnMish2d::new(
            filters / 2,
            DarknetConvOptions::square(hidden, params.kernel2)
                .with_weight_decay(params.weight_decay),
            device,
        );
        Self { reduce, expand }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = Composed::new(|x: Tensor<B, 4>| self.reduce.forward(x))
            .then(|x| self.expand.forward(x))
            .apply(input.clone());
        input + residual
    }
}

impl<B: Backend> L2Regularized<B> for ResBlock2d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        self.reduce.l2_penalty() + self.expand.l2_penalty()
    }
}

/// `x + conv(kernel2)(conv(kernel1)(x))` on 3D feature maps.
#[derive(Module, Debug)]
pub struct ResBlock3d<B: Backend> {
    reduce: ConvBnMish3d<B>,
    expand: ConvBnMish3d<B>,
}

impl<B: Backend> ResBlock3d<B> {
    pub fn new(filters: usize, all_narrow: bool, params: StageParams, device: &B::Device) -> Self {
        let hidden = hidden_channels(filters, all_narrow);
        let reduce = ConvBnMish3d::new(
            hidden,
            DarknetConvOptions::square(filters / 2, params.kernel1)
                .with_weight_decay(params.weight_decay),
            device,
        );
        let expand = ConvBnMish3d::new(
            filters / 2,
            DarknetConvOptions::square(hidden, params.kernel2)
                .with_weight_decay(params.weight_decay),
            device,
        );
        Self { reduce, expand }
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let residual = Composed::new(|x: Tensor<B, 5>| self.reduce.forward(x))
            .then(|x| self.expand.forward(x))
            .apply(input.clone());
        input + residual
    }
}

impl<B: Backend> L2Regularized<B> for ResBlock3d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        self.reduce.l2_penalty() + self.expand.l2_penalty()
    }
}

/// One CSP stage on 2D feature maps; halves the spatial extent.
#[derive(Module, Debug)]
pub struct CspStage2d<B: Backend> {
    downsample: ConvBnMish2d<B>,
    short: ConvBnMish2d<B>,
    main: ConvBnMish2d<B>,
    blocks: Vec<ResBlock2d<B>>,
    post: ConvBnMish2d<B>,
    fuse: ConvBnMish2d<B>,
}

impl<B: Backend> CspStage2d<B> {
    pub fn new(
        in_channels: usize,
        stage: &StageConfig,
        params: StageParams,
        device: &B::Device,
    ) -> Self {
        let filters = stage.filters;
        let hidden = hidden_channels(filters, stage.all_narrow);
        let wd = params.weight_decay;
        let pointwise =
            |out: usize| DarknetConvOptions::square(out, params.kernel1).with_weight_decay(wd);

        let downsample = ConvBnMish2d::new(
            in_channels,
            DarknetConvOptions::square(filters, params.kernel2)
                .with_strides([2, 2])
                .with_weight_decay(wd),
            device,
        );
        let short = ConvBnMish2d::new(filters, pointwise(hidden), device);
        let main = ConvBnMish2d::new(filters, pointwise(hidden), device);
        let blocks = (0..stage.blocks)
            .map(|_| ResBlock2d::new(filters, stage.all_narrow, params, device))
            .collect();
        let post = ConvBnMish2d::new(hidden, pointwise(hidden), device);
        let fuse = ConvBnMish2d::new(hidden * 2, pointwise(filters), device);

        Self {
            downsample,
            short,
            main,
            blocks,
            post,
            fuse,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.fuse.out_channels()
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.downsample.forward(pad_leading_edges(input));
        let short = self.short.forward(x.clone());

        let mut main = self.main.forward(x);
        for block in &self.blocks {
            main = block.forward(main);
        }
        let main = self.post.forward(main);

        self.fuse.forward(Tensor::cat(vec![main, short], CHANNEL_AXIS))
    }
}

impl<B: Backend> L2Regularized<B> for CspStage2d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut total = self.downsample.l2_penalty()
            + self.short.l2_penalty()
            + self.main.l2_penalty()
            + self.post.l2_penalty()
            + self.fuse.l2_penalty();
        for block in &self.blocks {
            total = total + block.l2_penalty();
        }
        total
    }
}

/// One CSP stage on 3D feature maps; halves every spatial extent.
#[derive(Module, Debug)]
pub struct CspStage3d<B: Backend> {
    downsample: ConvBnMish3d<B>,
    short: ConvBnMish3d<B>,
    main: ConvBnMish3d<B>,
    blocks: Vec<ResBlock3d<B>>,
    post: ConvBnMish3d<B>,
    fuse: ConvBnMish3d<B>,
}

impl<B: Backend> CspStage3d<B> {
    pub fn new(
        in_channels: usize,
        stage: &StageConfig,
        params: StageParams,
        device: &B::Device,
    ) -> Self {
        let filters = stage.filters;
        let hidden = hidden_channels(filters, stage.all_narrow);
        let wd = params.weight_decay;
        let pointwise =
            |out: usize| DarknetConvOptions::square(out, params.kernel1).with_weight_decay(wd);

        let downsample = ConvBnMish3d::new(
            in_channels,
            DarknetConvOptions::square(filters, params.kernel2)
                .with_strides([2, 2, 2])
                .with_weight_decay(wd),
            device,
        );
        let short = ConvBnMish3d::new(filters, pointwise(hidden), device);
        let main = ConvBnMish3d::new(filters, pointwise(hidden), device);
        let blocks = (0..stage.blocks)
            .map(|_| ResBlock3d::new(filters, stage.all_narrow, params, device))
            .collect();
        let post = ConvBnMish3d::new(hidden, pointwise(hidden), device);
        let fuse = ConvBnMish3d::new(hidden * 2, pointwise(filters), device);

        Self {
            downsample,
            short,
            main,
            blocks,
            post,
            fuse,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.fuse.out_channels()
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.downsample.forward(pad_leading_edges(input));
        let short = self.short.forward(x.clone());

        let mut main = self.main.forward(x);
        for block in &self.blocks {
            main = block.forward(main);
        }
        let main = self.post.forward(main);

        self.fuse.forward(Tensor::cat(vec![main, short], CHANNEL_AXIS))
    }
}

impl<B: Backend> L2Regularized<B> for CspStage3d<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut total = self.downsample.l2_penalty()
            + self.short.l2_penalty()
            + self.main.l2_penalty()
            + self.post.l2_penalty()
            + self.fuse.l2_penalty();
        for block in &self.blocks {
            total = total + block.l2_penalty();
        }
        total
    }
}
