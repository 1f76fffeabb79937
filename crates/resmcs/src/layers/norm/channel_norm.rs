//! # Channels-First Layer Norm

use burn::config::Config;
use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};

/// Configuration for [`ChannelNorm`].
#[derive(Config, Debug)]
pub struct ChannelNormConfig {
    /// Channel count.
    pub d_channels: usize,

    /// Variance epsilon.
    #[config(default = 1e-6)]
    pub epsilon: f64,
}

impl ChannelNormConfig {
    /// Initialize a [`ChannelNorm`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ChannelNorm<B> {
        ChannelNorm {
            norm: LayerNormConfig::new(self.d_channels)
                .with_epsilon(self.epsilon)
                .init(device),
        }
    }
}

/// Layer norm over the channel axis of a ``[B, C, H, W]`` map.
///
/// Each pixel is normalized over its `C` values (biased variance),
/// then scaled and shifted per channel.
#[derive(Module, Debug)]
pub struct ChannelNorm<B: Backend> {
    /// Underlying last-axis norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> ChannelNorm<B> {
    /// Channel count.
    pub fn d_channels(&self) -> usize {
        self.norm.gamma.dims()[0]
    }

    /// Normalize ``[B, C, H, W]``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = x.permute([0, 2, 3, 1]);
        let x = self.norm.forward(x);
        x.permute([0, 3, 1, 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_channel_norm_matches_formula() {
        let device = Default::default();
        let norm = ChannelNormConfig::new(5).init::<NdArray>(&device);
        assert_eq!(norm.d_channels(), 5);

        let x = Tensor::<NdArray, 4>::random([2, 5, 3, 4], Distribution::Normal(1.0, 2.0), &device);

        let mean = x.clone().mean_dim(1);
        let centered = x.clone() - mean;
        let var = centered.clone().powi_scalar(2).mean_dim(1);
        let expected = centered / (var + 1e-6).sqrt();

        norm.forward(x)
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());
    }
}
