//! # Normalization Layers

pub mod channel_norm;
