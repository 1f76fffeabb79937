//! # Attention Pooling
//!
//! Depthwise conv pooling of per-head token grids, with an optional
//! layer norm over the head dimension.
//!
//! See: MViTv2, <https://arxiv.org/abs/2112.01526>

use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for `AttentionPool` modules.
pub trait AttentionPoolMeta {
    /// Per-head feature size.
    fn d_head(&self) -> usize;

    /// Pool kernel ``[kh, kw]``.
    fn kernel(&self) -> [usize; 2];

    /// Pool stride ``[sh, sw]``.
    fn stride(&self) -> [usize; 2];

    /// Pool padding; ``kernel / 2``.
    fn padding(&self) -> [usize; 2] {
        let [kh, kw] = self.kernel();
        [kh / 2, kw / 2]
    }

    /// Whether the pooled tokens are layer normed.
    fn enable_norm(&self) -> bool;

    /// The pooled grid for an input grid.
    fn output_resolution(
        &self,
        hw: [usize; 2],
    ) -> [usize; 2] {
        let [k, s, p] = [self.kernel(), self.stride(), self.padding()];
        [0, 1].map(|i| (hw[i] + 2 * p[i] - k[i]) / s[i] + 1)
    }
}

/// Configuration for [`AttentionPool`].
#[derive(Config, Debug)]
pub struct AttentionPoolConfig {
    /// Per-head feature size.
    pub d_head: usize,

    /// Pool kernel.
    #[config(default = "[3, 3]")]
    pub kernel: [usize; 2],

    /// Pool stride.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],

    /// Whether the pooled tokens are layer normed.
    #[config(default = true)]
    pub enable_norm: bool,

    /// Norm epsilon.
    #[config(default = 1e-5)]
    pub norm_epsilon: f64,
}

impl AttentionPoolMeta for AttentionPoolConfig {
    fn d_head(&self) -> usize {
        self.d_head
    }

    fn kernel(&self) -> [usize; 2] {
        self.kernel
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn enable_norm(&self) -> bool {
        self.enable_norm
    }
}

impl AttentionPoolConfig {
    /// Initialize an [`AttentionPool`].
    ///
    /// ## Panics
    ///
    /// On zero `d_head`, kernel, or stride sizes.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> AttentionPool<B> {
        assert!(
            self.d_head > 0
                && self.kernel.iter().all(|&k| k > 0)
                && self.stride.iter().all(|&s| s > 0),
            "AttentionPool sizes must be non-zero: {self:?}"
        );
        let d = self.d_head;
        let [ph, pw] = self.padding();

        AttentionPool {
            stride: self.stride,
            conv: Conv2dConfig::new([d, d], self.kernel)
                .with_stride(self.stride)
                .with_padding(PaddingConfig2d::Explicit(ph, pw))
                .with_groups(d)
                .with_bias(false)
                .init(device),
            norm: self.enable_norm.then(|| {
                LayerNormConfig::new(d)
                    .with_epsilon(self.norm_epsilon)
                    .init(device)
            }),
        }
    }
}

/// Depthwise conv pooling over attention heads.
#[derive(Module, Debug)]
pub struct AttentionPool<B: Backend> {
    /// Pool stride.
    pub stride: [usize; 2],

    /// Depthwise pooling conv.
    pub conv: Conv2d<B>,

    /// Head norm, if enabled.
    pub norm: Option<LayerNorm<B>>,
}

impl<B: Backend> AttentionPoolMeta for AttentionPool<B> {
    fn d_head(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn kernel(&self) -> [usize; 2] {
        let [_, _, kh, kw] = self.conv.weight.dims();
        [kh, kw]
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn enable_norm(&self) -> bool {
        self.norm.is_some()
    }
}

impl<B: Backend> AttentionPool<B> {
    /// Pool multi-head tokens.
    ///
    /// ## Arguments
    ///
    /// * `x` - Tokens of shape ``[B, heads, h * w, d_head]``.
    /// * `hw` - The token grid, ``[h, w]``.
    ///
    /// ## Returns
    ///
    /// Pooled tokens ``[B, heads, h' * w', d_head]`` and ``[h', w']``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        hw: [usize; 2],
    ) -> (Tensor<B, 4>, [usize; 2]) {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!("batch", "heads", "height" * "width", "d_head");
        let [h, w] = hw;
        let [b, n] = INPUT_CONTRACT.unpack_shape(
            &x.dims(),
            &["batch", "heads"],
            &[("height", h), ("width", w), ("d_head", self.d_head())],
        );
        let d = self.d_head();

        let x = x.reshape([b * n, h, w, d]).permute([0, 3, 1, 2]);
        let x = self.conv.forward(x);
        let [_, _, ho, wo] = x.dims();

        let x = x.permute([0, 2, 3, 1]).reshape([b, n, ho * wo, d]);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract =
                shape_contract!("batch", "heads", "height" * "width", "d_head");
            OUTPUT_CONTRACT.assert_shape(
                &x.dims(),
                &[
                    ("batch", b),
                    ("heads", n),
                    ("height", ho),
                    ("width", wo),
                    ("d_head", d),
                ],
            );
        });

        (x, [ho, wo])
    }

    /// Pool single-head tokens.
    ///
    /// ## Arguments
    ///
    /// * `x` - Tokens of shape ``[B, h * w, d_head]``.
    /// * `hw` - The token grid, ``[h, w]``.
    ///
    /// ## Returns
    ///
    /// Pooled tokens ``[B, h' * w', d_head]`` and ``[h', w']``.
    #[must_use]
    pub fn forward_tokens(
        &self,
        x: Tensor<B, 3>,
        hw: [usize; 2],
    ) -> (Tensor<B, 3>, [usize; 2]) {
        let (x, hw) = self.forward(x.unsqueeze_dim(1), hw);
        (x.squeeze::<3>(1), hw)
    }
}
