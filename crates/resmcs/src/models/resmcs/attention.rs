//! # Pooling Attention
//!
//! Multi-head self attention where:
//!
//! * keys and values are computed from a spatially reduced grid
//!   (a strided depthwise conv, ``sr_ratio > 1``);
//! * queries, keys, and values are each conv-pooled per head
//!   ([`AttentionPool`]);
//! * the unpooled values are upsampled back to the query grid
//!   and added to the attention output.

use crate::layers::patching::{grid_to_tokens, tokens_to_grid};
use crate::layers::pooling::attention_pool::{AttentionPool, AttentionPoolConfig};
use crate::layers::upsample::{DepthwiseUpsample, DepthwiseUpsampleConfig, DepthwiseUpsampleMeta};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// `PoolingAttention` Config and Model Meta API.
pub trait PoolingAttentionMeta {
    /// Input (and output) feature size.
    fn d_input(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Per-head feature size.
    fn d_head(&self) -> usize {
        self.d_input() / self.num_heads()
    }

    /// Attention logit scale, ``d_head^-0.5``.
    fn scale(&self) -> f64 {
        (self.d_head() as f64).powf(-0.5)
    }

    /// Key/value spatial reduction ratio.
    fn sr_ratio(&self) -> usize;
}

/// `PoolingAttention` Config.
#[derive(Config, Debug)]
pub struct PoolingAttentionConfig {
    /// Input (and output) feature size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Key/value spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Query pool kernel; `None` disables query pooling.
    #[config(default = "Some([3, 3])")]
    pub kernel_q: Option<[usize; 2]>,

    /// Key/value pool kernel; `None` disables key/value pooling.
    #[config(default = "Some([3, 3])")]
    pub kernel_kv: Option<[usize; 2]>,

    /// Key/value pool stride.
    #[config(default = "[2, 2]")]
    pub stride_kv: [usize; 2],
}

impl PoolingAttentionMeta for PoolingAttentionConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }
}

impl PoolingAttentionConfig {
    /// Initialize a [`PoolingAttention`].
    ///
    /// ## Panics
    ///
    /// If sizes are zero, or `d_input` is not divisible by `num_heads`.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PoolingAttention<B> {
        let d = self.d_input;
        assert!(
            d > 0 && self.num_heads > 0 && self.sr_ratio > 0,
            "PoolingAttention sizes must be non-zero: {self:?}"
        );
        assert_eq!(
            d % self.num_heads,
            0,
            "d_input ({d}) must be divisible by num_heads ({})",
            self.num_heads
        );
        let d_head = self.d_head();
        let sr = self.sr_ratio;

        let pool = |kernel: Option<[usize; 2]>, stride: [usize; 2]| {
            kernel.map(|kernel| {
                AttentionPoolConfig::new(d_head)
                    .with_kernel(kernel)
                    .with_stride(stride)
                    .init(device)
            })
        };

        PoolingAttention {
            num_heads: self.num_heads,
            q: LinearConfig::new(d, d).init(device),
            kv: LinearConfig::new(d, 2 * d).init(device),
            sr: (sr > 1).then(|| SpatialReduction {
                conv: Conv2dConfig::new([d, d], [sr + 1, sr + 1])
                    .with_stride([sr, sr])
                    .with_padding(PaddingConfig2d::Explicit(sr / 2, sr / 2))
                    .with_groups(d)
                    .init(device),
                norm: LayerNormConfig::new(d).with_epsilon(1e-6).init(device),
            }),
            up: DepthwiseUpsampleConfig::new(d)
                .with_upscale_factor(sr)
                .init(device),
            up_norm: LayerNormConfig::new(d).with_epsilon(1e-6).init(device),
            proj: LinearConfig::new(d, d).init(device),
            pool_q: pool(self.kernel_q, [1, 1]),
            pool_k: pool(self.kernel_kv, self.stride_kv),
            pool_v: pool(self.kernel_kv, self.stride_kv),
        }
    }
}

/// Strided depthwise conv + norm over the key/value source grid.
#[derive(Module, Debug)]
pub struct SpatialReduction<B: Backend> {
    conv: Conv2d<B>,
    norm: LayerNorm<B>,
}

impl<B: Backend> SpatialReduction<B> {
    /// Reduce ``[B, h * w, d]`` tokens.
    ///
    /// ## Returns
    ///
    /// The reduced tokens, and their grid.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        hw: [usize; 2],
    ) -> (Tensor<B, 3>, [usize; 2]) {
        let x = self.conv.forward(tokens_to_grid(x, hw));
        let (x, hw) = grid_to_tokens(x);
        (self.norm.forward(x), hw)
    }
}

/// Pooling multi-head self attention.
#[derive(Module, Debug)]
pub struct PoolingAttention<B: Backend> {
    num_heads: usize,
    q: Linear<B>,
    kv: Linear<B>,
    sr: Option<SpatialReduction<B>>,
    up: DepthwiseUpsample<B>,
    up_norm: LayerNorm<B>,
    proj: Linear<B>,
    pool_q: Option<AttentionPool<B>>,
    pool_k: Option<AttentionPool<B>>,
    pool_v: Option<AttentionPool<B>>,
}

impl<B: Backend> PoolingAttentionMeta for PoolingAttention<B> {
    fn d_input(&self) -> usize {
        self.q.weight.dims()[0]
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.up.upscale_factor()
    }
}

/// ``[B, L, heads * d_head] -> [B, heads, L, d_head]``
fn split_heads<B: Backend>(
    x: Tensor<B, 3>,
    num_heads: usize,
) -> Tensor<B, 4> {
    let [b, l, c] = x.dims();
    x.reshape([b, l, num_heads, c / num_heads]).swap_dims(1, 2)
}

/// ``[B, heads, L, d_head] -> [B, L, heads * d_head]``
fn merge_heads<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [b, n, l, d] = x.dims();
    x.swap_dims(1, 2).reshape([b, l, n * d])
}

/// Optionally pool multi-head tokens.
fn maybe_pool<B: Backend>(
    pool: &Option<AttentionPool<B>>,
    x: Tensor<B, 4>,
    hw: [usize; 2],
) -> Tensor<B, 4> {
    match pool {
        Some(pool) => pool.forward(x, hw).0,
        None => x,
    }
}

impl<B: Backend> PoolingAttention<B> {
    /// Apply attention.
    ///
    /// ## Arguments
    ///
    /// * `x` - Tokens of shape ``[B, h * w, d_input]``.
    /// * `hw` - The token grid, ``[h, w]``; both must be divisible by `sr_ratio`.
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
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!("batch", "height" * "width", "d_input");
        static GRID_CONTRACT: ShapeContract = shape_contract!(
            "kv_height" * "sr_ratio",
            "kv_width" * "sr_ratio"
        );
        let [h, w] = hw;
        let [b] = INPUT_CONTRACT.unpack_shape(
            &x.dims(),
            &["batch"],
            &[("height", h), ("width", w), ("d_input", self.d_input())],
        );
        let kv_hw = GRID_CONTRACT.unpack_shape(
            &hw,
            &["kv_height", "kv_width"],
            &[("sr_ratio", self.sr_ratio())],
        );
        let c = self.d_input();
        let n = h * w;

        let q = split_heads(self.q.forward(x.clone()), self.num_heads);
        let q = maybe_pool(&self.pool_q, q, hw);

        let x = match &self.sr {
            Some(sr) => sr.forward(x, hw).0,
            None => x,
        };

        let kv = self.kv.forward(x);
        let k = split_heads(kv.clone().narrow(2, 0, c), self.num_heads);
        let v = split_heads(kv.narrow(2, c, c), self.num_heads);

        let identity = v.clone();
        let k = maybe_pool(&self.pool_k, k, kv_hw);
        let v = maybe_pool(&self.pool_v, v, kv_hw);

        let attn = q.matmul(k.transpose()).mul_scalar(self.scale());
        let attn = softmax(attn, 3);
        let x = merge_heads(attn.matmul(v));
        run_every_nth!({
            static ATTN_CONTRACT: ShapeContract =
                shape_contract!("batch", "tokens", "d_input");
            ATTN_CONTRACT.assert_shape(
                &x.dims(),
                &[("batch", b), ("tokens", n), ("d_input", c)],
            );
        });

        // [B, heads, L, d_head] -> [B, C, h / sr, w / sr]
        let [kv_h, kv_w] = kv_hw;
        let identity = identity.swap_dims(2, 3).reshape([b, c, kv_h, kv_w]);
        let (identity, _) = grid_to_tokens(self.up.forward(identity));
        let identity = self.up_norm.forward(identity);

        self.proj.forward(x + identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_attention_meta() {
        let config = PoolingAttentionConfig::new(64, 4).with_sr_ratio(2);
        assert_eq!(config.d_input(), 64);
        assert_eq!(config.num_heads(), 4);
        assert_eq!(config.d_head(), 16);
        assert_eq!(config.sr_ratio(), 2);
        assert_eq!(config.scale(), 0.25);
        assert_eq!(config.kernel_q, Some([3, 3]));
        assert_eq!(config.kernel_kv, Some([3, 3]));
        assert_eq!(config.stride_kv, [2, 2]);

        let device = Default::default();
        let attn = config.init::<NdArray>(&device);
        assert_eq!(attn.d_input(), 64);
        assert_eq!(attn.num_heads(), 4);
        assert_eq!(attn.d_head(), 16);
        assert_eq!(attn.sr_ratio(), 2);
        assert!(attn.sr.is_some());
        assert!(attn.pool_q.is_some());
        assert_eq!(attn.kv.weight.dims(), [64, 128]);
    }

    #[test]
    fn test_attention_forward_shapes() {
        let device = Default::default();

        for (sr, hw) in [(1, [5, 3]), (2, [8, 6]), (4, [8, 8]), (8, [16, 8])] {
            let attn = PoolingAttentionConfig::new(16, 2)
                .with_sr_ratio(sr)
                .init::<NdArray>(&device);

            let [h, w] = hw;
            let x = Tensor::<NdArray, 3>::random([2, h * w, 16], Distribution::Default, &device);
            assert_eq!(attn.forward(x, hw).dims(), [2, h * w, 16], "sr={sr}");
        }
    }

    #[test]
    fn test_attention_without_pools() {
        let device = Default::default();
        let attn = PoolingAttentionConfig::new(8, 1)
            .with_kernel_q(None)
            .with_kernel_kv(None)
            .init::<NdArray>(&device);
        assert!(attn.sr.is_none());
        assert!(attn.pool_q.is_none());
        assert!(attn.pool_k.is_none());
        assert!(attn.pool_v.is_none());

        let hw = [3, 4];
        let x = Tensor::<NdArray, 3>::random([2, 12, 8], Distribution::Default, &device);

        // Single-head attention, written out.
        let q = attn.q.forward(x.clone());
        let kv = attn.kv.forward(x.clone());
        let k = kv.clone().narrow(2, 0, 8);
        let v = kv.narrow(2, 8, 8);
        let scores = softmax(q.matmul(k.transpose()).mul_scalar(8f64.powf(-0.5)), 2);
        let identity = grid_to_tokens(attn.up.forward(tokens_to_grid(v.clone(), hw))).0;
        let expected = attn
            .proj
            .forward(scores.matmul(v) + attn.up_norm.forward(identity));

        attn.forward(x, hw)
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());
    }

    #[test]
    fn test_attention_reduced_and_pooled() {
        let device = Default::default();
        let attn = PoolingAttentionConfig::new(8, 2)
            .with_sr_ratio(2)
            .init::<NdArray>(&device);

        let [b, c, heads, d_head] = [2, 8, 2, 4];
        let [h, w] = [4, 6];
        let [kv_h, kv_w] = [2, 3];
        let x = Tensor::<NdArray, 3>::random([b, h * w, c], Distribution::Default, &device);

        let heads_of = |t: Tensor<NdArray, 3>| {
            let l = t.dims()[1];
            t.reshape([b, l, heads, d_head]).swap_dims(1, 2)
        };

        // Queries: full grid, pooled with stride 1.
        let q = heads_of(attn.q.forward(x.clone()));
        let (q, q_hw) = attn.pool_q.as_ref().unwrap().forward(q, [h, w]);
        assert_eq!(q_hw, [h, w]);

        // Keys and values: from the 2x reduced grid.
        let sr = attn.sr.as_ref().unwrap();
        let reduced = sr
            .conv
            .forward(x.clone().swap_dims(1, 2).reshape([b, c, h, w]));
        assert_eq!(reduced.dims(), [b, c, kv_h, kv_w]);
        let reduced = sr
            .norm
            .forward(reduced.reshape([b, c, kv_h * kv_w]).swap_dims(1, 2));
        let kv = attn.kv.forward(reduced);
        let k_tokens = kv.clone().narrow(2, 0, c);
        let v_tokens = kv.narrow(2, c, c);

        // The unpooled values, upsampled back onto the query grid.
        let identity = v_tokens.clone().swap_dims(1, 2).reshape([b, c, kv_h, kv_w]);
        let identity = attn.up.forward(identity);
        assert_eq!(identity.dims(), [b, c, h, w]);
        let identity = attn
            .up_norm
            .forward(identity.reshape([b, c, h * w]).swap_dims(1, 2));

        let (k, k_hw) = attn
            .pool_k
            .as_ref()
            .unwrap()
            .forward(heads_of(k_tokens), [kv_h, kv_w]);
        let (v, v_hw) = attn
            .pool_v
            .as_ref()
            .unwrap()
            .forward(heads_of(v_tokens), [kv_h, kv_w]);
        assert_eq!(k_hw, [1, 2]);
        assert_eq!(v_hw, [1, 2]);

        let scores = softmax(q.matmul(k.transpose()).mul_scalar(0.5), 3);
        let attended = scores.matmul(v).swap_dims(1, 2).reshape([b, h * w, c]);
        let expected = attn.proj.forward(attended + identity);

        attn.forward(x, [h, w])
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());
    }

    #[should_panic]
    #[test]
    fn test_attention_indivisible_grid() {
        let device = Default::default();
        let attn = PoolingAttentionConfig::new(8, 2)
            .with_sr_ratio(4)
            .init::<NdArray>(&device);

        let x = Tensor::<NdArray, 3>::zeros([1, 6 * 8, 8], &device);
        let _d = attn.forward(x, [6, 8]);
    }

    #[should_panic(expected = "must be divisible by num_heads")]
    #[test]
    fn test_attention_bad_heads() {
        let device = Default::default();
        let _d = PoolingAttentionConfig::new(10, 3).init::<NdArray>(&device);
    }
}
