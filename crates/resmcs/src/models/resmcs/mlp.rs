//! Transformer MLP.

use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// `Mlp` Config and Model Meta API.
pub trait MlpMeta {
    /// Input (and output) feature size.
    fn d_input(&self) -> usize;

    /// Hidden feature size.
    fn d_hidden(&self) -> usize;

    /// Dropout probability.
    fn drop(&self) -> f64;
}

/// `Mlp` Config.
#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Input (and output) feature size.
    pub d_input: usize,

    /// Hidden size, as a multiple of `d_input`.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Dropout probability.
    #[config(default = 0.0)]
    pub drop: f64,
}

impl MlpMeta for MlpConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_hidden(&self) -> usize {
        (self.d_input as f64 * self.mlp_ratio) as usize
    }

    fn drop(&self) -> f64 {
        self.drop
    }
}

impl MlpConfig {
    /// Initialize an [`Mlp`].
    ///
    /// ## Panics
    ///
    /// If the hidden size rounds to zero.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Mlp<B> {
        let d_input = self.d_input();
        let d_hidden = self.d_hidden();
        assert!(d_hidden > 0, "Mlp hidden size must be non-zero: {self:?}");

        Mlp {
            fc1: LinearConfig::new(d_input, d_hidden).init(device),
            fc2: LinearConfig::new(d_hidden, d_input).init(device),
            act: Gelu::new(),
            drop: DropoutConfig { prob: self.drop }.init(),
        }
    }
}

/// Transformer feed-forward block.
///
/// ``fc1 -> GELU -> dropout -> fc2 -> dropout``
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    act: Gelu,
    drop: Dropout,
}

impl<B: Backend> MlpMeta for Mlp<B> {
    fn d_input(&self) -> usize {
        self.fc1.weight.dims()[0]
    }

    fn d_hidden(&self) -> usize {
        self.fc1.weight.dims()[1]
    }

    fn drop(&self) -> f64 {
        self.drop.prob
    }
}

impl<B: Backend> Mlp<B> {
    /// Apply the MLP over the last axis.
    #[must_use]
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
    ) -> Tensor<B, D> {
        run_every_nth!({
            static INPUT_CONTRACT: ShapeContract = shape_contract!(..., "in");
            INPUT_CONTRACT.assert_shape(&x.dims(), &[("in", self.d_input())]);
        });

        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);

        let x = self.fc2.forward(x);
        self.drop.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_mlp_meta() {
        let config = MlpConfig::new(12);
        assert_eq!(config.d_input(), 12);
        assert_eq!(config.d_hidden(), 48);
        assert_eq!(config.drop(), 0.0);

        let device = Default::default();
        let mlp = config
            .with_mlp_ratio(2.5)
            .with_drop(0.1)
            .init::<NdArray>(&device);
        assert_eq!(mlp.d_input(), 12);
        assert_eq!(mlp.d_hidden(), 30);
        assert_eq!(mlp.drop(), 0.1);
    }

    #[test]
    fn test_mlp_forward() {
        let device = Default::default();
        let mlp = MlpConfig::new(8).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 3>::random([2, 5, 8], Distribution::Default, &device);
        assert_eq!(mlp.forward(x).dims(), [2, 5, 8]);
    }
}
