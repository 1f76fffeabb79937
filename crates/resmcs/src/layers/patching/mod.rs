//! # Patching Layers
//!
//! Layers which map image grids to token sequences.
//!
//! Tokens are laid out row-major: a ``[B, C, h, w]`` grid becomes
//! ``[B, h * w, C]``, with token ``i * w + j`` at pixel ``(i, j)``.

use bimm_contracts::{ShapeContract, shape_contract};
use burn::prelude::{Backend, Tensor};

pub mod conv_stem;
pub mod patch_embed;
pub mod pixel_attention;

/// Flatten a ``[B, C, h, w]`` grid into ``[B, h * w, C]`` tokens.
///
/// ## Returns
///
/// The tokens, and the grid resolution ``[h, w]``.
#[must_use]
pub fn grid_to_tokens<B: Backend>(x: Tensor<B, 4>) -> (Tensor<B, 3>, [usize; 2]) {
    let [_, _, h, w] = x.dims();
    (x.flatten(2, 3).swap_dims(1, 2), [h, w])
}

/// Lay out ``[B, h * w, C]`` tokens as a ``[B, C, h, w]`` grid.
///
/// ## Panics
///
/// If the token count is not ``h * w``.
#[must_use]
pub fn tokens_to_grid<B: Backend>(
    x: Tensor<B, 3>,
    hw: [usize; 2],
) -> Tensor<B, 4> {
    static CONTRACT: ShapeContract = shape_contract!("batch", "height" * "width", "channels");
    let [h, w] = hw;
    let [b, c] = CONTRACT.unpack_shape(
        &x.dims(),
        &["batch", "channels"],
        &[("height", h), ("width", w)],
    );

    x.swap_dims(1, 2).reshape([b, c, h, w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::prelude::{Int, TensorData};

    #[test]
    fn test_grid_tokens_layout() {
        let device = Default::default();
        let grid: Tensor<NdArray, 4> = Tensor::<NdArray, 1, Int>::arange(0..12, &device)
            .float()
            .reshape([1, 2, 2, 3]);

        let (tokens, hw) = grid_to_tokens(grid.clone());
        assert_eq!(hw, [2, 3]);
        tokens.clone().to_data().assert_eq(
            &TensorData::from([[
                [0.0f32, 6.0],
                [1.0, 7.0],
                [2.0, 8.0],
                [3.0, 9.0],
                [4.0, 10.0],
                [5.0, 11.0],
            ]]),
            false,
        );

        tokens_to_grid(tokens, hw)
            .to_data()
            .assert_eq(&grid.to_data(), true);
    }

    #[should_panic]
    #[test]
    fn test_tokens_to_grid_bad_resolution() {
        let device = Default::default();
        let tokens: Tensor<NdArray, 3> = Tensor::zeros([1, 6, 2], &device);
        let _d = tokens_to_grid(tokens, [2, 2]);
    }
}
