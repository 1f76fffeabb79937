//! # Stochastic Depth
//!
//! Each `ResMCS` block owns one [`DropPath`], whose rate grows with the
//! block's depth in the backbone. While training, the residual branch of a
//! sample is zeroed with probability `rate`, and surviving branches are
//! scaled by ``1 / (1 - rate)``; at inference the branch passes through.
//!
//! Paper: Deep Networks with Stochastic Depth (<https://arxiv.org/abs/1603.09382>)

use crate::utility::probability::expect_probability;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// Per-sample residual branch dropping.
///
/// Only active on autodiff backends.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping a sample's branch.
    pub rate: f64,
}

impl DropPath {
    /// Create a drop path layer.
    ///
    /// ## Panics
    ///
    /// If `rate` is not in ``[0, 1]``.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: expect_probability(rate),
        }
    }

    /// Whether branches can be dropped on backend `B`.
    pub fn is_active<B: Backend>(&self) -> bool {
        B::ad_enabled() && self.rate > 0.0
    }

    /// Sample a ``[batch, 1, ...]`` branch mask.
    ///
    /// Kept rows hold ``1 / (1 - rate)``, dropped rows hold 0.
    #[must_use]
    pub fn sample_mask<B: Backend, const D: usize>(
        &self,
        batch: usize,
        device: &B::Device,
    ) -> Tensor<B, D> {
        let keep = 1.0 - self.rate;
        let mut shape = [1; D];
        shape[0] = batch;

        let mask = Tensor::random(shape, Distribution::Bernoulli(keep), device);
        if keep > 0.0 {
            mask.div_scalar(keep)
        } else {
            mask
        }
    }

    /// Drop a residual branch.
    ///
    /// ## Arguments
    ///
    /// * `branch` - Branch output; dim 0 is the batch.
    ///
    /// ## Returns
    ///
    /// The masked branch, or `branch` itself when inactive.
    #[must_use]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        branch: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if !self.is_active::<B>() {
            return branch;
        }
        let mask = self.sample_mask(branch.dims()[0], &branch.device());
        branch * mask
    }

    /// ``skip + drop_path(branch)``
    #[must_use]
    pub fn residual<B: Backend, const D: usize>(
        &self,
        skip: Tensor<B, D>,
        branch: Tensor<B, D>,
    ) -> Tensor<B, D> {
        skip + self.forward(branch)
    }
}
