//! # Upsampling Layers
//!
//! [`DepthwiseUpsample`] expands each channel into an ``r x r`` spatial block:
//! a depthwise 3x3 conv produces ``r^2`` maps per channel, and
//! [`pixel_shuffle`] lays them out on the ``r``-times finer grid.

use crate::compat::ops::pixel_shuffle;
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for [`DepthwiseUpsample`].
pub trait DepthwiseUpsampleMeta {
    /// Channel count; unchanged by the layer.
    fn d_channels(&self) -> usize;

    /// Spatial upscale factor.
    fn upscale_factor(&self) -> usize;
}

/// Configuration for [`DepthwiseUpsample`].
#[derive(Config, Debug)]
pub struct DepthwiseUpsampleConfig {
    /// Channel count.
    pub d_channels: usize,

    /// Spatial upscale factor.
    #[config(default = 1)]
    pub upscale_factor: usize,
}

impl DepthwiseUpsampleMeta for DepthwiseUpsampleConfig {
    fn d_channels(&self) -> usize {
        self.d_channels
    }

    fn upscale_factor(&self) -> usize {
        self.upscale_factor
    }
}

impl DepthwiseUpsampleConfig {
    /// Initialize a [`DepthwiseUpsample`].
    ///
    /// ## Panics
    ///
    /// If `d_channels` or `upscale_factor` is zero.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DepthwiseUpsample<B> {
        let d = self.d_channels;
        let r = self.upscale_factor;
        assert!(
            d > 0 && r > 0,
            "d_channels and upscale_factor must be non-zero: {self:?}"
        );

        DepthwiseUpsample {
            upscale_factor: r,
            conv: Conv2dConfig::new([d, r * r * d], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(d)
                .init(device),
        }
    }
}

/// Depthwise conv + pixel shuffle upsampling.
///
/// Maps ``[B, d, h, w]`` to ``[B, d, h * r, w * r]``.
#[derive(Module, Debug)]
pub struct DepthwiseUpsample<B: Backend> {
    /// Spatial upscale factor.
    pub upscale_factor: usize,

    /// Depthwise expansion conv, ``d -> r^2 d``.
    pub conv: Conv2d<B>,
}

impl<B: Backend> DepthwiseUpsampleMeta for DepthwiseUpsample<B> {
    fn d_channels(&self) -> usize {
        let r = self.upscale_factor;
        self.conv.weight.dims()[0] / (r * r)
    }

    fn upscale_factor(&self) -> usize {
        self.upscale_factor
    }
}

impl<B: Backend> DepthwiseUpsample<B> {
    /// Upsample a feature map.
    ///
    /// ## Arguments
    ///
    /// * `x` - Input of shape ``[B, d, h, w]``.
    ///
    /// ## Returns
    ///
    /// Output of shape ``[B, d, h * r, w * r]``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!("batch", "d_channels", "height", "width");
        let [b, h, w] = INPUT_CONTRACT.unpack_shape(
            &x.dims(),
            &["batch", "height", "width"],
            &[("d_channels", self.d_channels())],
        );
        let r = self.upscale_factor;

        let x = pixel_shuffle(self.conv.forward(x), r);
        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!("batch", "d_channels", "height", "width");
            OUTPUT_CONTRACT.assert_shape(
                &x.dims(),
                &[
                    ("batch", b),
                    ("d_channels", self.d_channels()),
                    ("height", h * r),
                    ("width", w * r),
                ],
            );
        });

        x
    }
}
