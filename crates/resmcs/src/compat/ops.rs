//! Tensor and numeric ops missing from the ``burn`` release we build against.

use burn::prelude::{Backend, Tensor};

/// Evenly spaced values over a closed interval.
///
/// ## Arguments
///
/// * `start` - The first value.
/// * `end` - The last value.
/// * `num` - The number of values.
///
/// ## Returns
///
/// `num` values from `start` to `end`, inclusive;
/// `[]` for `num == 0`, and `[start]` for `num == 1`.
#[must_use]
pub fn float_vec_linspace(
    start: f64,
    end: f64,
    num: usize,
) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Rearranges channel blocks into spatial blocks.
///
/// Equivalent to ``torch.nn.functional.pixel_shuffle``:
///
/// ```math
/// out[b, c, h r + i, w r + j] = in[b, c r^2 + i r + j, h, w]
/// ```
///
/// ## Arguments
///
/// * `x` - Input tensor of shape ``(B, C * r * r, H, W)``.
/// * `upscale_factor` - The spatial upscale factor, `r`.
///
/// ## Returns
///
/// A tensor of shape ``(B, C, H * r, W * r)``.
///
/// ## Panics
///
/// * If `upscale_factor` is zero.
/// * If the channel count is not divisible by `upscale_factor^2`.
#[must_use]
pub fn pixel_shuffle<B: Backend>(
    x: Tensor<B, 4>,
    upscale_factor: usize,
) -> Tensor<B, 4> {
    let r = upscale_factor;
    assert!(r > 0, "upscale_factor must be greater than zero");

    let [b, c, h, w] = x.dims();
    assert_eq!(
        c % (r * r),
        0,
        "Channels ({c}) must be divisible by upscale_factor^2 ({})",
        r * r
    );
    if r == 1 {
        return x;
    }
    let c_out = c / (r * r);

    x.reshape([b, c_out, r, r, h, w])
        // b, c_out, h, r(i), w, r(j)
        .permute([0, 1, 4, 2, 5, 3])
        .reshape([b, c_out, h * r, w * r])
}
