//! Mish activation: `x * tanh(softplus(x))`.

use burn::module::Module;
use burn::tensor::activation::{softplus, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Apply Mish element-wise. Works for any tensor rank and preserves the shape.
pub fn mish<B: Backend, const D: usize>(input: Tensor<B, D>) -> Tensor<B, D> {
    input.clone() * tanh(softplus(input, 1.0))
}

/// Parameterless Mish layer, so it can sit in a module struct next to conv/norm.
#[derive(Module, Clone, Debug, Default)]
pub struct Mish;

impl Mish {
    pub fn new() -> Self {
        Self
    }

    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        mish(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn mish_matches_reference_values() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_data(
            TensorData::new(vec![-1.0f32, 0.0, 1.0, 20.0], [4]),
            &device,
        );
        let out = mish(input).into_data().to_vec::<f32>().unwrap_or_default();
        let expected = [-0.303_401_4f32, 0.0, 0.865_098_4, 20.0];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "got {got}, want {want}");
        }
    }

    #[test]
    fn mish_layer_keeps_shape() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 5>::ones([1, 2, 3, 4, 5], &device);
        let out = Mish::new().forward(input);
        assert_eq!(out.dims(), [1, 2, 3, 4, 5]);
    }
}
