//! # Convolutional Stem
//!
//! Embeds an image at stride 4:
//!
//! * two ``ConvNorm`` 3x3 stride-2 steps, ``d_input -> d_output/2 -> d_output``;
//! * a 1x1 projection;
//! * optional [`PixelAttention`] positional encoding;
//! * flatten to tokens, and layer norm.

use crate::layers::blocks::conv_norm::{ConvNorm, ConvNormConfig, ConvNormMeta};
use crate::layers::patching::grid_to_tokens;
use crate::layers::patching::pixel_attention::{PixelAttention, PixelAttentionConfig};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for `ConvStem` modules.
pub trait ConvStemMeta {
    /// Input channels.
    fn d_input(&self) -> usize;

    /// Output (token) feature size.
    fn d_output(&self) -> usize;

    /// Hidden channels between the two strided convs.
    fn d_hidden(&self) -> usize {
        self.d_output() / 2
    }

    /// Total spatial stride.
    fn patch_size(&self) -> usize {
        4
    }

    /// Whether pixel attention is applied.
    fn enable_pos(&self) -> bool;
}

/// Configuration for [`ConvStem`].
#[derive(Config, Debug)]
pub struct ConvStemConfig {
    /// Input channels.
    #[config(default = 3)]
    pub d_input: usize,

    /// Output (token) feature size; must be even.
    pub d_output: usize,

    /// Whether pixel attention is applied.
    #[config(default = true)]
    pub enable_pos: bool,
}

impl ConvStemMeta for ConvStemConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn enable_pos(&self) -> bool {
        self.enable_pos
    }
}

impl ConvStemConfig {
    /// Initialize a [`ConvStem`].
    ///
    /// ## Panics
    ///
    /// If `d_output` is zero or odd.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvStem<B> {
        assert!(
            self.d_output > 0 && self.d_output % 2 == 0,
            "ConvStem d_output must be even and non-zero: {}",
            self.d_output
        );
        let d_hidden = self.d_hidden();
        let d_output = self.d_output;

        ConvStem {
            conv1: ConvNormConfig::new(self.d_input, d_hidden)
                .with_stride(2)
                .init(device),
            conv2: ConvNormConfig::new(d_hidden, d_output)
                .with_stride(2)
                .init(device),
            proj: Conv2dConfig::new([d_output, d_output], [1, 1]).init(device),
            pa: self
                .enable_pos
                .then(|| PixelAttentionConfig::new(d_output).init(device)),
            norm: LayerNormConfig::new(d_output)
                .with_epsilon(1e-6)
                .init(device),
        }
    }
}

/// Convolutional stem; stride 4.
#[derive(Module, Debug)]
pub struct ConvStem<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    proj: Conv2d<B>,
    pa: Option<PixelAttention<B>>,
    norm: LayerNorm<B>,
}

impl<B: Backend> ConvStemMeta for ConvStem<B> {
    fn d_input(&self) -> usize {
        self.conv1.d_input()
    }

    fn d_output(&self) -> usize {
        self.proj.weight.dims()[0]
    }

    fn enable_pos(&self) -> bool {
        self.pa.is_some()
    }
}

impl<B: Backend> ConvStem<B> {
    /// Embed an image.
    ///
    /// ## Arguments
    ///
    /// * `x` - Input of shape ``[B, d_input, H, W]``.
    ///
    /// ## Returns
    ///
    /// Tokens ``[B, h * w, d_output]`` and the token grid ``[h, w]``;
    /// ``[H / 4, W / 4]`` when `H` and `W` are multiples of 4.
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

        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
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
