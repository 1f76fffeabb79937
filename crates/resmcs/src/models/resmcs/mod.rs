//! # `ResMCS` Backbone
//!
//! A four-stage (by default) vision transformer for dense prediction.
//!
//! * Stage 0 embeds the image with a convolutional stem (stride 4);
//!   each later stage embeds the previous feature map with an overlapping
//!   patch projection (stride 2).
//! * Blocks use [`attention::PoolingAttention`]: keys and values are
//!   spatially reduced (ResTv2) and conv-pooled (MViTv2), and the unpooled
//!   values are upsampled back as a residual identity.
//! * Block residuals are max-pooled ("skip pooling").
//!
//! References:
//! * ResTv2: <https://github.com/wofmanaf/ResT>
//! * MViTv2: <https://github.com/facebookresearch/mvit>

pub mod attention;
pub mod backbone;
pub mod block;
pub mod error;
pub mod mlp;
pub mod stage;
