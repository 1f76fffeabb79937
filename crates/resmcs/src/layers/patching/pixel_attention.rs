//! # Pixel Attention
//!
//! A sigmoid-gated depthwise conv, used as a positional encoding:
//!
//! ```math
//! PA(x) = x \cdot \sigma(dwconv_{3 \times 3}(x))
//! ```

use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::sigmoid;

/// Configuration for [`PixelAttention`].
#[derive(Config, Debug)]
pub struct PixelAttentionConfig {
    /// Channel count.
    pub d_channels: usize,
}

impl PixelAttentionConfig {
    /// Initialize a [`PixelAttention`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PixelAttention<B> {
        let d = self.d_channels;
        PixelAttention {
            pa_conv: Conv2dConfig::new([d, d], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(d)
                .init(device),
        }
    }
}

/// Pixel attention; shape preserving on ``[B, C, H, W]``.
#[derive(Module, Debug)]
pub struct PixelAttention<B: Backend> {
    /// Depthwise gate conv.
    pub pa_conv: Conv2d<B>,
}

impl<B: Backend> PixelAttention<B> {
    /// Channel count.
    pub fn d_channels(&self) -> usize {
        self.pa_conv.weight.dims()[0]
    }

    /// Gate `x` by its own depthwise response.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let gate = sigmoid(self.pa_conv.forward(x.clone()));
        x * gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_pixel_attention() {
        let device = Default::default();
        let pa = PixelAttentionConfig::new(6).init::<NdArray>(&device);
        assert_eq!(pa.d_channels(), 6);
        assert_eq!(pa.pa_conv.weight.dims(), [6, 1, 3, 3]);

        let x = Tensor::<NdArray, 4>::random([2, 6, 5, 7], Distribution::Default, &device);
        let y = pa.forward(x.clone());
        assert_eq!(y.dims(), [2, 6, 5, 7]);

        let expected = x.clone() * sigmoid(pa.pa_conv.forward(x));
        y.into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());
    }
}
