//! # `ResMCS` Backbone
//!
//! Maps ``[B, d_input, H, W]`` images to multi-scale feature maps
//! ``[B, embed_dims[i], H / s_i, W / s_i]``, ``s_i = 4 * 2^i``,
//! one per selected stage, each channel-normed.
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use burn::prelude::Tensor;
//! use resmcs::models::resmcs::backbone::ResMcsConfig;
//!
//! let device = Default::default();
//! let backbone = ResMcsConfig::new().init::<NdArray>(&device);
//!
//! let features = backbone.forward(Tensor::zeros([1, 3, 224, 224], &device));
//! assert_eq!(features[3].dims(), [1, 768, 7, 7]);
//! ```

use crate::compat::ops::float_vec_linspace;
use crate::layers::norm::channel_norm::{ChannelNorm, ChannelNormConfig};
use crate::models::resmcs::error::ResMcsError;
use crate::models::resmcs::stage::{ResMcsStage, ResMcsStageConfig, ResMcsStageMeta};
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// `ResMcs` Config and Model Meta API.
pub trait ResMcsMeta {
    /// Input image channels.
    fn d_input(&self) -> usize;

    /// Per-stage feature sizes.
    fn embed_dims(&self) -> Vec<usize>;

    /// Per-stage block counts.
    fn depths(&self) -> Vec<usize>;

    /// Per-stage attention heads.
    fn num_heads(&self) -> Vec<usize>;

    /// Per-stage key/value spatial reduction ratios.
    fn sr_ratios(&self) -> Vec<usize>;

    /// Stages emitted as features, in stage order.
    fn out_indices(&self) -> Vec<usize>;

    /// Number of stages.
    fn num_stages(&self) -> usize {
        self.embed_dims().len()
    }

    /// Total spatial stride of stage `i`: ``4 * 2^i``.
    ///
    /// ## Panics
    ///
    /// If the stride does not fit in `usize`.
    fn stage_stride(
        &self,
        i: usize,
    ) -> usize {
        let stride = checked_stage_stride(i).ok_or(ResMcsError::InputMultipleOverflow { stage: i });
        expect_unwrap(stride)
    }

    /// Channels of each emitted feature map.
    fn feature_channels(&self) -> Vec<usize> {
        let dims = self.embed_dims();
        self.out_indices().iter().map(|&i| dims[i]).collect()
    }

    /// Stride of each emitted feature map.
    fn feature_strides(&self) -> Vec<usize> {
        self.out_indices()
            .iter()
            .map(|&i| self.stage_stride(i))
            .collect()
    }

    /// Input `H` and `W` must be multiples of this.
    ///
    /// Every stage grid must divide by that stage's `sr_ratio`:
    /// ``lcm_i(4 * 2^i * sr_i)``.
    ///
    /// ## Returns
    ///
    /// The multiple, or the first stage at which it overflows `usize`.
    fn try_input_multiple(&self) -> Result<usize, ResMcsError> {
        let mut multiple = 1;
        for (stage, sr) in self.sr_ratios().into_iter().enumerate() {
            multiple = checked_stage_stride(stage)
                .and_then(|stride| stride.checked_mul(sr))
                .and_then(|m| checked_lcm(multiple, m))
                .ok_or(ResMcsError::InputMultipleOverflow { stage })?;
        }
        Ok(multiple)
    }

    /// Input `H` and `W` must be multiples of this.
    ///
    /// See [`ResMcsMeta::try_input_multiple`].
    ///
    /// ## Panics
    ///
    /// On overflow.
    fn input_multiple(&self) -> usize {
        expect_unwrap(self.try_input_multiple())
    }
}

/// ``4 * 2^i``, or `None` on overflow.
fn checked_stage_stride(i: usize) -> Option<usize> {
    let shift = u32::try_from(i).ok()?;
    1usize.checked_shl(shift)?.checked_mul(4)
}

fn gcd(
    a: usize,
    b: usize,
) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn checked_lcm(
    a: usize,
    b: usize,
) -> Option<usize> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b)
}

/// `ResMcs` Config.
#[derive(Config, Debug)]
pub struct ResMcsConfig {
    /// Input image channels.
    #[config(default = 3)]
    pub d_input: usize,

    /// Per-stage feature sizes.
    #[config(default = "vec![96, 192, 384, 768]")]
    pub embed_dims: Vec<usize>,

    /// Per-stage attention heads.
    #[config(default = "vec![1, 2, 4, 8]")]
    pub num_heads: Vec<usize>,

    /// Per-stage block counts.
    #[config(default = "vec![2, 2, 2, 2]")]
    pub depths: Vec<usize>,

    /// Per-stage key/value spatial reduction ratios.
    #[config(default = "vec![8, 4, 2, 1]")]
    pub sr_ratios: Vec<usize>,

    /// Drop path rate of the deepest block; earlier blocks ramp linearly from 0.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// Stages emitted as features.
    #[config(default = "vec![0, 1, 2, 3]")]
    pub out_indices: Vec<usize>,

    /// MLP hidden size ratio.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether stage embeddings apply pixel attention.
    #[config(default = true)]
    pub enable_pos: bool,
}

impl ResMcsMeta for ResMcsConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.embed_dims.clone()
    }

    fn depths(&self) -> Vec<usize> {
        self.depths.clone()
    }

    fn num_heads(&self) -> Vec<usize> {
        self.num_heads.clone()
    }

    fn sr_ratios(&self) -> Vec<usize> {
        self.sr_ratios.clone()
    }

    fn out_indices(&self) -> Vec<usize> {
        let mut indices = self.out_indices.clone();
        indices.sort_unstable();
        indices
    }
}

/// A validated `ResMcs` build plan.
#[derive(Debug, Clone)]
pub struct ResMcsPlan {
    /// Input image channels.
    pub d_input: usize,

    /// Stage configs, in order.
    pub stages: Vec<ResMcsStageConfig>,

    /// Emitted stage indices, sorted.
    pub out_indices: Vec<usize>,

    /// Output norm configs; parallel to `out_indices`.
    pub out_norms: Vec<ChannelNormConfig>,

    /// Input `H` and `W` must be multiples of this.
    pub input_multiple: usize,
}

impl ResMcsConfig {
    /// Check the config, and build a plan.
    ///
    /// ## Returns
    ///
    /// A [`ResMcsPlan`], or the first problem found.
    pub fn validate(&self) -> Result<ResMcsPlan, ResMcsError> {
        let num_stages = self.embed_dims.len();
        if num_stages == 0 {
            return Err(ResMcsError::NoStages);
        }
        for (name, actual) in [
            ("num_heads", self.num_heads.len()),
            ("depths", self.depths.len()),
            ("sr_ratios", self.sr_ratios.len()),
        ] {
            if actual != num_stages {
                return Err(ResMcsError::StageCountMismatch {
                    name,
                    expected: num_stages,
                    actual,
                });
            }
        }

        if self.d_input == 0 {
            return Err(ResMcsError::ZeroInputChannels);
        }
        for stage in 0..num_stages {
            for (name, value) in [
                ("embed_dims", self.embed_dims[stage]),
                ("num_heads", self.num_heads[stage]),
                ("depths", self.depths[stage]),
                ("sr_ratios", self.sr_ratios[stage]),
            ] {
                if value == 0 {
                    return Err(ResMcsError::ZeroStageParam { stage, name });
                }
            }

            let d_embed = self.embed_dims[stage];
            let num_heads = self.num_heads[stage];
            if d_embed % num_heads != 0 {
                return Err(ResMcsError::HeadsDoNotDivide {
                    stage,
                    d_embed,
                    num_heads,
                });
            }
        }
        if self.embed_dims[0] % 2 != 0 {
            return Err(ResMcsError::OddStemDim(self.embed_dims[0]));
        }

        if !(0.0..1.0).contains(&self.drop_path_rate) {
            return Err(ResMcsError::InvalidDropPathRate(self.drop_path_rate));
        }
        if !(self.mlp_ratio > 0.0 && self.embed_dims.iter().all(|&d| d as f64 * self.mlp_ratio >= 1.0)) {
            return Err(ResMcsError::InvalidMlpRatio(self.mlp_ratio));
        }

        let out_indices = self.out_indices();
        for (pos, &index) in out_indices.iter().enumerate() {
            if index >= num_stages {
                return Err(ResMcsError::OutIndexOutOfRange { index, num_stages });
            }
            if pos > 0 && out_indices[pos - 1] == index {
                return Err(ResMcsError::DuplicateOutIndex(index));
            }
        }

        let input_multiple = self.try_input_multiple()?;

        // Block rates ramp linearly over the whole backbone.
        let rates = float_vec_linspace(0.0, self.drop_path_rate, self.depths.iter().sum());
        let mut rates = rates.as_slice();
        let stages: Vec<ResMcsStageConfig> = (0..num_stages)
            .map(|i| {
                let (stage_rates, rest) = rates.split_at(self.depths[i]);
                rates = rest;

                let d_input = if i == 0 {
                    self.d_input
                } else {
                    self.embed_dims[i - 1]
                };
                ResMcsStageConfig::new(
                    d_input,
                    self.embed_dims[i],
                    self.num_heads[i],
                    stage_rates.to_vec(),
                )
                .with_sr_ratio(self.sr_ratios[i])
                .with_mlp_ratio(self.mlp_ratio)
                .with_enable_pos(self.enable_pos)
                .with_conv_stem(i == 0)
            })
            .collect();

        let out_norms = out_indices
            .iter()
            .map(|&i| ChannelNormConfig::new(self.embed_dims[i]))
            .collect();

        let plan = ResMcsPlan {
            d_input: self.d_input,
            stages,
            out_indices,
            out_norms,
            input_multiple,
        };
        tracing::debug!(
            embed_dims = ?self.embed_dims,
            depths = ?self.depths,
            num_heads = ?self.num_heads,
            sr_ratios = ?self.sr_ratios,
            out_indices = ?plan.out_indices,
            input_multiple = plan.input_multiple,
            "validated ResMCS config"
        );

        Ok(plan)
    }

    /// Initialize a [`ResMcs`] backbone.
    ///
    /// ## Returns
    ///
    /// The backbone, or the config error.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<ResMcs<B>, ResMcsError> {
        let plan = self.validate()?;

        let stages: Vec<ResMcsStage<B>> = plan
            .stages
            .iter()
            .map(|stage| stage.init(device))
            .collect();
        let out_norms = plan
            .out_norms
            .iter()
            .map(|norm| norm.init(device))
            .collect();

        tracing::debug!(
            num_stages = stages.len(),
            num_blocks = stages.iter().map(|s| s.depth()).sum::<usize>(),
            "initialized ResMCS backbone"
        );

        Ok(ResMcs {
            d_input: plan.d_input,
            input_multiple: plan.input_multiple,
            out_indices: plan.out_indices,
            stages,
            out_norms,
        })
    }

    /// Initialize a [`ResMcs`] backbone.
    ///
    /// ## Panics
    ///
    /// On config error.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResMcs<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// `ResMCS` hierarchical vision transformer backbone.
#[derive(Module, Debug)]
pub struct ResMcs<B: Backend> {
    d_input: usize,
    input_multiple: usize,
    out_indices: Vec<usize>,
    stages: Vec<ResMcsStage<B>>,
    out_norms: Vec<ChannelNorm<B>>,
}

impl<B: Backend> ResMcsMeta for ResMcs<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.d_embed()).collect()
    }

    fn depths(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.depth()).collect()
    }

    fn num_heads(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.num_heads()).collect()
    }

    fn sr_ratios(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.sr_ratio()).collect()
    }

    fn out_indices(&self) -> Vec<usize> {
        self.out_indices.clone()
    }

    fn input_multiple(&self) -> usize {
        self.input_multiple
    }
}

impl<B: Backend> ResMcs<B> {
    /// The stages, in order.
    pub fn stages(&self) -> &[ResMcsStage<B>] {
        &self.stages
    }

    /// Extract features.
    ///
    /// ## Arguments
    ///
    /// * `x` - Images of shape ``[B, d_input, H, W]``.
    ///
    /// ## Returns
    ///
    /// One ``[B, embed_dims[i], H / s_i, W / s_i]`` map per out index,
    /// in stage order; or an error for a bad channel count or resolution.
    pub fn try_forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Result<Vec<Tensor<B, 4>>, ResMcsError> {
        let [_, c, h, w] = x.dims();
        if c != self.d_input {
            return Err(ResMcsError::InputChannelMismatch {
                expected: self.d_input,
                actual: c,
            });
        }
        let m = self.input_multiple;
        if h == 0 || w == 0 || h % m != 0 || w % m != 0 {
            return Err(ResMcsError::InvalidInputResolution {
                resolution: [h, w],
                multiple: m,
            });
        }

        let last = match self.out_indices.last() {
            Some(&last) => last,
            None => return Ok(Vec::new()),
        };

        let mut outputs = Vec::with_capacity(self.out_indices.len());
        let mut norms = self.out_indices.iter().zip(&self.out_norms).peekable();
        let mut x = x;
        for (i, stage) in self.stages[..=last].iter().enumerate() {
            x = stage.forward(x);
            tracing::trace!(stage = i, shape = ?x.dims(), "stage output");

            if let Some((_, norm)) = norms.next_if(|&(&index, _)| index == i) {
                outputs.push(norm.forward(x.clone()));
            }
        }

        Ok(outputs)
    }

    /// Extract features.
    ///
    /// See [`ResMcs::try_forward`].
    ///
    /// ## Panics
    ///
    /// On a bad channel count or resolution.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        expect_unwrap(self.try_forward(x))
    }
}

/// Named `ResMcs` configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResMcsPreset {
    /// ``dims [96, 192, 384, 768], heads [1, 2, 4, 8], depths [2, 2, 2, 2]``.
    Default,

    /// Depths ``[1, 2, 6, 2]``.
    Tiny,

    /// Depths ``[1, 2, 12, 2]``.
    Small,

    /// Depths ``[1, 3, 16, 3]``.
    Base,

    /// ``dims [128, 256, 512, 1024], heads [2, 4, 8, 16], depths [2, 3, 16, 2]``.
    Large,
}

impl ResMcsPreset {
    /// All presets.
    pub const ALL: [ResMcsPreset; 5] = [
        ResMcsPreset::Default,
        ResMcsPreset::Tiny,
        ResMcsPreset::Small,
        ResMcsPreset::Base,
        ResMcsPreset::Large,
    ];

    /// The preset name.
    pub fn name(&self) -> &'static str {
        match self {
            ResMcsPreset::Default => "default",
            ResMcsPreset::Tiny => "tiny",
            ResMcsPreset::Small => "small",
            ResMcsPreset::Base => "base",
            ResMcsPreset::Large => "large",
        }
    }

    /// The preset config.
    pub fn config(&self) -> ResMcsConfig {
        let config = ResMcsConfig::new();
        match self {
            ResMcsPreset::Default => config,
            ResMcsPreset::Tiny => config.with_depths(vec![1, 2, 6, 2]),
            ResMcsPreset::Small => config.with_depths(vec![1, 2, 12, 2]),
            ResMcsPreset::Base => config.with_depths(vec![1, 3, 16, 3]),
            ResMcsPreset::Large => config
                .with_embed_dims(vec![128, 256, 512, 1024])
                .with_num_heads(vec![2, 4, 8, 16])
                .with_depths(vec![2, 3, 16, 2]),
        }
    }
}

impl Display for ResMcsPreset {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResMcsPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        ResMcsPreset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = ResMcsPreset::ALL.iter().map(|p| p.name()).collect();
                format!("unknown preset {s:?}; expected one of {names:?}")
            })
    }
}
