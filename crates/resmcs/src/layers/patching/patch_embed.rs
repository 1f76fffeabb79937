//! # Overlapping Patch Embedding
//!
//! A strided conv with kernel ``patch_size + 1``, so neighbouring patches
//! overlap by one pixel; then optional [`PixelAttention`], flatten, and norm.

use crate::layers::patching::grid_to_tokens;
use crate::layers::patching::pixel_attention::{PixelAttention, PixelAttentionConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for `PatchEmbed` modules.
pub trait PatchEmbedMeta {
    /// Input channels.
    fn d_input(&self) -> usize;

    /// Output (token) feature size.
    fn d_output(&self) -> usize;

    /// Patch stride.
    fn patch_size(&self) -> usize;

    /// Projection kernel size.
    fn kernel_size(&self) -> usize {
        self.patch_size() + 1
    }

    /// Projection padding.
    fn padding(&self) -> usize {
        self.patch_size() / 2
    }

    /// Whether pixel attention is applied.
    fn enable_pos(&self) -> bool;
}

/// Configuration for [`PatchEmbed`].
#[derive(Config, Debug)]
pub struct PatchEmbedConfig {
    /// Input channels.
    pub d_input: usize,

    /// Output (token) feature size.
    pub d_output: usize,

    /// Patch stride.
    #[config(default = 2)]
    pub patch_size: usize,

    /// Whether pixel attention is applied.
    #[config(default = true)]
    pub enable_pos: bool,
}

impl PatchEmbedMeta for PatchEmbedConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn enable_pos(&self) -> bool {
        self.enable_pos
    }
}

impl PatchEmbedConfig {
    /// Initialize a [`PatchEmbed`].
    ///
    /// ## Panics
    ///
    /// If `patch_size` is zero.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PatchEmbed<B> {
        assert!(self.patch_size > 0, "patch_size must be non-zero");

        let k = self.kernel_size();
        let s = self.patch_size;
        let p = self.padding();

        PatchEmbed {
            patch_size: s,
            proj: Conv2dConfig::new([self.d_input, self.d_output], [k, k])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(p, p))
                .init(device),
            pa: self
                .enable_pos
                .then(|| PixelAttentionConfig::new(self.d_output).init(device)),
            norm: LayerNormConfig::new(self.d_output)
                .with_epsilon(1e-6)
                .init(device),
        }
    }
}

/// Overlapping patch embedding.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    /// Patch stride.
    pub patch_size: usize,

    /// Overlapping projection.
    pub proj: Conv2d<B>,

    /// Positional encoding, if enabled.
    pub pa: Option<PixelAttention<B>>,

    /// Token norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> PatchEmbedMeta for PatchEmbed<B> {
    fn d_input(&self) -> usize {
        self.proj.weight.dims()[1]
    }

    fn d_output(&self) -> usize {
        self.proj.weight.dims()[0]
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn enable_pos(&self) -> bool {
        self.pa.is_some()
    }
}

impl<B: Backend> PatchEmbed<B> {
    /// Embed a feature map.
    ///
    /// ## Arguments
    ///
    /// * `x` - Input of shape ``[B, d_input, H, W]``.
    ///
    /// ## Returns
    ///
    /// Tokens ``[B, h * w, d_output]`` and the token grid ``[h, w]``;
    /// ``[H / patch_size, W / patch_size]`` for divisible inputs.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!("batch", "d_input", "height", "width");
        let [b] = INPUT_CONTRACT.unpack_shape(
            &x.dims(),
            &["batch"],
            &[("d_input", self.d_input())],
        );

        let x = self.proj.forward(x);
        let x = match &self.pa {
            Some(pa) => pa.forward(x),
            None => x,
        };

        let (x, [h, w]) = grid_to_tokens(x);
        let x = self.norm.forward(x);
        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!("batch", "height" * "width", "d_output");
            OUTPUT_CONTRACT.assert_shape(
                &x.dims(),
                &[
                    ("batch", b),
                    ("height", h),
                    ("width", w),
                    ("d_output", self.d_output()),
                ],
            );
        });

        (x, [h, w])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_patch_embed_meta() {
        let config = PatchEmbedConfig::new(96, 192);
        assert_eq!(config.d_input(), 96);
        assert_eq!(config.d_output(), 192);
        assert_eq!(config.patch_size(), 2);
        assert_eq!(config.kernel_size(), 3);
        assert_eq!(config.padding(), 1);
        assert!(config.enable_pos());

        let device = Default::default();
        let embed = config
            .with_patch_size(4)
            .with_enable_pos(false)
            .init::<NdArray>(&device);
        assert_eq!(embed.d_input(), 96);
        assert_eq!(embed.d_output(), 192);
        assert_eq!(embed.patch_size(), 4);
        assert_eq!(embed.kernel_size(), 5);
        assert_eq!(embed.padding(), 2);
        assert!(!embed.enable_pos());
        assert_eq!(embed.proj.weight.dims(), [192, 96, 5, 5]);
    }

    #[test]
    fn test_patch_embed_forward() {
        let device = Default::default();
        let embed = PatchEmbedConfig::new(4, 8).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random([2, 4, 12, 10], Distribution::Default, &device);
        let (tokens, hw) = embed.forward(x);

        assert_eq!(hw, [6, 5]);
        assert_eq!(tokens.dims(), [2, 30, 8]);
    }

    #[should_panic]
    #[test]
    fn test_patch_embed_wrong_channels() {
        let device = Default::default();
        let embed = PatchEmbedConfig::new(4, 8).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::zeros([1, 3, 8, 8], &device);
        let _d = embed.forward(x);
    }
}
