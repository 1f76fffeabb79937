//! # `ConvNorm` Block
//!
//! ``Conv2d (no bias) -> BatchNorm2d -> ReLU?``

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// `ConvNorm` Config and Model Meta API.
pub trait ConvNormMeta {
    /// Input channels.
    fn d_input(&self) -> usize;

    /// Output channels.
    fn d_output(&self) -> usize;

    /// Square kernel size.
    fn kernel(&self) -> usize;

    /// Conv stride.
    fn stride(&self) -> usize;

    /// Conv padding.
    fn padding(&self) -> usize;

    /// Whether a ReLU follows the norm.
    fn enable_act(&self) -> bool;
}

/// `ConvNorm` Config.
#[derive(Config, Debug)]
pub struct ConvNormConfig {
    /// Input channels.
    pub d_input: usize,

    /// Output channels.
    pub d_output: usize,

    /// Square kernel size.
    #[config(default = 3)]
    pub kernel: usize,

    /// Conv stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Conv padding; ``kernel / 2`` when unset.
    #[config(default = "None")]
    pub padding: Option<usize>,

    /// Whether a ReLU follows the norm.
    #[config(default = true)]
    pub enable_act: bool,
}

impl ConvNormMeta for ConvNormConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn kernel(&self) -> usize {
        self.kernel
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> usize {
        self.padding.unwrap_or(self.kernel / 2)
    }

    fn enable_act(&self) -> bool {
        self.enable_act
    }
}

impl ConvNormConfig {
    /// Initialize a [`ConvNorm`] block.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNorm<B> {
        let p = self.padding();

        let conv = Conv2dConfig::new([self.d_input, self.d_output], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(p, p))
            .with_bias(false)
            .init(device);

        let norm: BatchNorm<B, 2> = BatchNormConfig::new(self.d_output).init(device);

        ConvNorm {
            stride: self.stride,
            padding: p,
            conv,
            norm,
            act: self.enable_act.then(Relu::new),
        }
    }
}

/// ``Conv2d + BatchNorm2d (+ ReLU)``.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    stride: usize,
    padding: usize,
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    act: Option<Relu>,
}

impl<B: Backend> ConvNormMeta for ConvNorm<B> {
    fn d_input(&self) -> usize {
        self.conv.weight.dims()[1]
    }

    fn d_output(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn kernel(&self) -> usize {
        self.conv.weight.dims()[2]
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> usize {
        self.padding
    }

    fn enable_act(&self) -> bool {
        self.act.is_some()
    }
}

impl<B: Backend> ConvNorm<B> {
    /// Apply the block to ``[B, d_input, H, W]``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        match &self.act {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_conv_norm_config() {
        let config = ConvNormConfig::new(3, 16).with_stride(2);

        assert_eq!(config.d_input(), 3);
        assert_eq!(config.d_output(), 16);
        assert_eq!(config.kernel(), 3);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.padding(), 1);
        assert!(config.enable_act());

        let config = config.with_kernel(5).with_enable_act(false);
        assert_eq!(config.padding(), 2);
        assert_eq!(config.with_padding(Some(0)).padding(), 0);
    }

    #[test]
    fn test_conv_norm_forward() {
        let device = Default::default();
        let block = ConvNormConfig::new(3, 8)
            .with_stride(2)
            .init::<NdArray>(&device);

        assert_eq!(block.d_input(), 3);
        assert_eq!(block.d_output(), 8);
        assert_eq!(block.kernel(), 3);
        assert_eq!(block.stride(), 2);
        assert_eq!(block.padding(), 1);
        assert!(block.enable_act());

        let x = Tensor::<NdArray, 4>::random([2, 3, 16, 12], Distribution::Default, &device);
        let y = block.forward(x);
        assert_eq!(y.dims(), [2, 8, 8, 6]);

        // ReLU output.
        assert!(y.min().into_scalar() >= 0.0);
    }

    #[test]
    fn test_conv_norm_without_act() {
        let device = Default::default();
        let block = ConvNormConfig::new(4, 4)
            .with_kernel(1)
            .with_enable_act(false)
            .init::<NdArray>(&device);
        assert!(!block.enable_act());
        assert_eq!(block.padding(), 0);

        let x = Tensor::<NdArray, 4>::random([1, 4, 5, 5], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [1, 4, 5, 5]);
    }
}
