//! # Reusable Layers

pub mod blocks;
pub mod drop;
pub mod norm;
pub mod patching;
pub mod pooling;
pub mod upsample;
