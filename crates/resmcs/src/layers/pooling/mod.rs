//! # Pooling Layers

pub mod attention_pool;
