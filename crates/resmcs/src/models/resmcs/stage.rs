//! # `ResMCS` Stages
//!
//! A stage embeds its input feature map (conv stem for the first stage,
//! overlapping patch embedding after), runs a sequence of blocks at that
//! resolution, and lays the tokens back out as a feature map.

use crate::layers::patching::conv_stem::{ConvStem, ConvStemConfig, ConvStemMeta};
use crate::layers::patching::patch_embed::{PatchEmbed, PatchEmbedConfig, PatchEmbedMeta};
use crate::layers::patching::tokens_to_grid;
use crate::models::resmcs::block::{ResMcsBlock, ResMcsBlockConfig, ResMcsBlockMeta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// `ResMcsStage` Config and Model Meta API.
pub trait ResMcsStageMeta {
    /// Input channels.
    fn d_input(&self) -> usize;

    /// Stage feature size.
    fn d_embed(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Key/value spatial reduction ratio.
    fn sr_ratio(&self) -> usize;

    /// Number of blocks.
    fn depth(&self) -> usize;

    /// Whether the stage embeds with a conv stem.
    fn conv_stem(&self) -> bool;

    /// Spatial stride of the stage embedding.
    fn embed_stride(&self) -> usize {
        if self.conv_stem() { 4 } else { 2 }
    }
}

/// `ResMcsStage` Config.
#[derive(Config, Debug)]
pub struct ResMcsStageConfig {
    /// Input channels.
    pub d_input: usize,

    /// Stage feature size.
    pub d_embed: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Drop path rate of each block; one entry per block.
    pub drop_path_rates: Vec<f64>,

    /// Key/value spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// MLP hidden size ratio.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether the embedding applies pixel attention.
    #[config(default = true)]
    pub enable_pos: bool,

    /// Embed with a conv stem (stride 4) instead of a patch embed (stride 2).
    #[config(default = false)]
    pub conv_stem: bool,
}

impl ResMcsStageMeta for ResMcsStageConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_embed(&self) -> usize {
        self.d_embed
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn depth(&self) -> usize {
        self.drop_path_rates.len()
    }

    fn conv_stem(&self) -> bool {
        self.conv_stem
    }
}

impl ResMcsStageConfig {
    /// Initialize a [`ResMcsStage`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResMcsStage<B> {
        let embed = if self.conv_stem {
            StageEmbed::Stem(
                ConvStemConfig::new(self.d_embed)
                    .with_d_input(self.d_input)
                    .with_enable_pos(self.enable_pos)
                    .init(device),
            )
        } else {
            StageEmbed::Patch(
                PatchEmbedConfig::new(self.d_input, self.d_embed)
                    .with_enable_pos(self.enable_pos)
                    .init(device),
            )
        };

        let blocks = self
            .drop_path_rates
            .iter()
            .map(|&rate| {
                ResMcsBlockConfig::new(self.d_embed, self.num_heads)
                    .with_sr_ratio(self.sr_ratio)
                    .with_drop_path_rate(rate)
                    .with_mlp_ratio(self.mlp_ratio)
                    .init(device)
            })
            .collect();

        ResMcsStage {
            num_heads: self.num_heads,
            sr_ratio: self.sr_ratio,
            embed,
            blocks,
        }
    }
}

/// Stage input embedding.
#[derive(Module, Debug)]
pub enum StageEmbed<B: Backend> {
    /// Conv stem; stride 4.
    Stem(ConvStem<B>),

    /// Overlapping patch embed; stride 2.
    Patch(PatchEmbed<B>),
}

impl<B: Backend> StageEmbed<B> {
    /// Input channels.
    pub fn d_input(&self) -> usize {
        match self {
            Self::Stem(stem) => stem.d_input(),
            Self::Patch(patch) => patch.d_input(),
        }
    }

    /// Output feature size.
    pub fn d_output(&self) -> usize {
        match self {
            Self::Stem(stem) => stem.d_output(),
            Self::Patch(patch) => patch.d_output(),
        }
    }

    /// Embed ``[B, d_input, H, W]`` into tokens and their grid.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        match self {
            Self::Stem(stem) => stem.forward(x),
            Self::Patch(patch) => patch.forward(x),
        }
    }
}

/// `ResMCS` stage.
#[derive(Module, Debug)]
pub struct ResMcsStage<B: Backend> {
    num_heads: usize,
    sr_ratio: usize,
    embed: StageEmbed<B>,
    blocks: Vec<ResMcsBlock<B>>,
}

impl<B: Backend> ResMcsStageMeta for ResMcsStage<B> {
    fn d_input(&self) -> usize {
        self.embed.d_input()
    }

    fn d_embed(&self) -> usize {
        self.embed.d_output()
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }

    fn conv_stem(&self) -> bool {
        matches!(self.embed, StageEmbed::Stem(_))
    }
}

impl<B: Backend> ResMcsStage<B> {
    /// The per-block drop path rates.
    pub fn drop_path_rates(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.drop_path_rate()).collect()
    }

    /// Apply the stage.
    ///
    /// ## Arguments
    ///
    /// * `x` - Feature map of shape ``[B, d_input, H, W]``.
    ///
    /// ## Returns
    ///
    /// Feature map of shape ``[B, d_embed, H / s, W / s]``,
    /// where `s` is the embedding stride.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let (mut x, hw) = self.embed.forward(x);
        for block in &self.blocks {
            x = block.forward(x, hw);
        }

        let x = tokens_to_grid(x, hw);
        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!("batch", "d_embed", "height", "width");
            OUTPUT_CONTRACT.assert_shape(
                &x.dims(),
                &[
                    ("d_embed", self.d_embed()),
                    ("height", hw[0]),
                    ("width", hw[1]),
                ],
            );
        });

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stage_meta() {
        let config = ResMcsStageConfig::new(3, 16, 1, vec![0.0, 0.1]).with_conv_stem(true);
        assert_eq!(config.d_input(), 3);
        assert_eq!(config.d_embed(), 16);
        assert_eq!(config.depth(), 2);
        assert_eq!(config.embed_stride(), 4);

        let device = Default::default();
        let stage = config.init::<NdArray>(&device);
        assert_eq!(stage.d_input(), 3);
        assert_eq!(stage.d_embed(), 16);
        assert_eq!(stage.num_heads(), 1);
        assert_eq!(stage.sr_ratio(), 1);
        assert_eq!(stage.depth(), 2);
        assert!(stage.conv_stem());
        assert_eq!(stage.drop_path_rates(), vec![0.0, 0.1]);
    }

    #[test]
    fn test_stem_stage_forward() {
        let device = Default::default();
        let stage = ResMcsStageConfig::new(3, 8, 1, vec![0.0])
            .with_sr_ratio(2)
            .with_conv_stem(true)
            .init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random([2, 3, 32, 16], Distribution::Default, &device);
        assert_eq!(stage.forward(x).dims(), [2, 8, 8, 4]);
    }

    #[test]
    fn test_patch_stage_forward() {
        let device = Default::default();
        let stage = ResMcsStageConfig::new(8, 16, 2, vec![0.0, 0.0, 0.0])
            .init::<NdArray>(&device);
        assert!(!stage.conv_stem());
        assert_eq!(stage.embed_stride(), 2);

        let x = Tensor::<NdArray, 4>::random([1, 8, 8, 12], Distribution::Default, &device);
        assert_eq!(stage.forward(x).dims(), [1, 16, 4, 6]);
    }
}
