//! # Drop Layers

pub mod path;
