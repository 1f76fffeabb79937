//! # `ResMCS` Transformer Block
//!
//! ```text
//! skip = maxpool_3x3(x)
//! x = skip + drop_path(attn(norm1(x)))
//! x = x + drop_path(mlp(norm2(x)))
//! ```

use crate::layers::drop::path::DropPath;
use crate::layers::patching::{grid_to_tokens, tokens_to_grid};
use crate::models::resmcs::attention::{
    PoolingAttention, PoolingAttentionConfig, PoolingAttentionMeta,
};
use crate::models::resmcs::mlp::{Mlp, MlpConfig, MlpMeta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// `ResMcsBlock` Config and Model Meta API.
pub trait ResMcsBlockMeta {
    /// Input (and output) feature size.
    fn d_input(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Key/value spatial reduction ratio.
    fn sr_ratio(&self) -> usize;

    /// Drop path rate.
    fn drop_path_rate(&self) -> f64;

    /// MLP hidden size.
    fn d_hidden(&self) -> usize;
}

/// `ResMcsBlock` Config.
#[derive(Config, Debug)]
pub struct ResMcsBlockConfig {
    /// Input (and output) feature size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Key/value spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Drop path rate.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// MLP hidden size ratio.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,
}

impl ResMcsBlockConfig {
    fn attention_config(&self) -> PoolingAttentionConfig {
        PoolingAttentionConfig::new(self.d_input, self.num_heads).with_sr_ratio(self.sr_ratio)
    }

    fn mlp_config(&self) -> MlpConfig {
        MlpConfig::new(self.d_input).with_mlp_ratio(self.mlp_ratio)
    }

    /// Initialize a [`ResMcsBlock`].
    ///
    /// ## Panics
    ///
    /// On invalid attention or MLP sizes, or a drop path rate outside ``[0, 1]``.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResMcsBlock<B> {
        let d = self.d_input;
        ResMcsBlock {
            norm1: LayerNormConfig::new(d).with_epsilon(1e-6).init(device),
            attn: self.attention_config().init(device),
            norm2: LayerNormConfig::new(d).with_epsilon(1e-6).init(device),
            mlp: self.mlp_config().init(device),
            drop_path: DropPath::new(self.drop_path_rate),
            pool_skip: MaxPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
        }
    }
}

impl ResMcsBlockMeta for ResMcsBlockConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path_rate
    }

    fn d_hidden(&self) -> usize {
        self.mlp_config().d_hidden()
    }
}

/// `ResMCS` transformer block with a skip-pooled residual.
#[derive(Module, Debug)]
pub struct ResMcsBlock<B: Backend> {
    norm1: LayerNorm<B>,
    attn: PoolingAttention<B>,
    norm2: LayerNorm<B>,
    mlp: Mlp<B>,
    drop_path: DropPath,
    pool_skip: MaxPool2d,
}

impl<B: Backend> ResMcsBlockMeta for ResMcsBlock<B> {
    fn d_input(&self) -> usize {
        self.attn.d_input()
    }

    fn num_heads(&self) -> usize {
        self.attn.num_heads()
    }

    fn sr_ratio(&self) -> usize {
        self.attn.sr_ratio()
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path.rate
    }

    fn d_hidden(&self) -> usize {
        self.mlp.d_hidden()
    }
}

impl<B: Backend> ResMcsBlock<B> {
    /// Apply the block.
    ///
    /// ## Arguments
    ///
    /// * `x` - Tokens of shape ``[B, h * w, d_input]``.
    /// * `hw` - The token grid, ``[h, w]``.
    ///
    /// ## Returns
    ///
    /// Tokens of shape ``[B, h * w, d_input]``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        hw: [usize; 2],
    ) -> Tensor<B, 3> {
        static CONTRACT: ShapeContract = shape_contract!("batch", "height" * "width", "d_input");
        let [h, w] = hw;
        let env = [("height", h), ("width", w), ("d_input", self.d_input())];
        CONTRACT.assert_shape(&x.dims(), &env);

        let skip = self.pool_skip.forward(tokens_to_grid(x.clone(), hw));
        let (skip, _) = grid_to_tokens(skip);

        let branch = self.attn.forward(self.norm1.forward(x), hw);
        let x = self.drop_path.residual(skip, branch);
        run_every_nth!(CONTRACT.assert_shape(&x.dims(), &env));

        let branch = self.mlp.forward(self.norm2.forward(x.clone()));
        let x = self.drop_path.residual(x, branch);
        run_every_nth!(CONTRACT.assert_shape(&x.dims(), &env));

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_block_meta() {
        let config = ResMcsBlockConfig::new(32, 2)
            .with_sr_ratio(4)
            .with_drop_path_rate(0.1);
        assert_eq!(config.d_input(), 32);
        assert_eq!(config.num_heads(), 2);
        assert_eq!(config.sr_ratio(), 4);
        assert_eq!(config.drop_path_rate(), 0.1);
        assert_eq!(config.d_hidden(), 128);

        let device = Default::default();
        let block = config.init::<NdArray>(&device);
        assert_eq!(block.d_input(), 32);
        assert_eq!(block.num_heads(), 2);
        assert_eq!(block.sr_ratio(), 4);
        assert_eq!(block.drop_path_rate(), 0.1);
        assert_eq!(block.d_hidden(), 128);
    }

    #[test]
    fn test_block_forward() {
        let device = Default::default();
        let block = ResMcsBlockConfig::new(16, 2)
            .with_sr_ratio(2)
            .init::<NdArray>(&device);

        let x = Tensor::<NdArray, 3>::random([2, 8 * 4, 16], Distribution::Default, &device);
        assert_eq!(block.forward(x, [8, 4]).dims(), [2, 32, 16]);
    }

    #[test]
    fn test_skip_pool_is_local_max() {
        let device = Default::default();
        let block = ResMcsBlockConfig::new(4, 1).init::<NdArray>(&device);

        let x: Tensor<NdArray, 4> = Tensor::zeros([1, 4, 3, 3], &device);
        let x = x.slice_assign(
            [0..1, 0..4, 0..1, 0..1],
            Tensor::ones([1, 4, 1, 1], &device),
        );
        let pooled = block.pool_skip.forward(x);

        let expected: Tensor<NdArray, 4> = Tensor::from_data(
            [[[[1.0, 1.0, 0.0], [1.0, 1.0, 0.0], [0.0, 0.0, 0.0]]]],
            &device,
        );
        pooled
            .narrow(1, 0, 1)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }
}
