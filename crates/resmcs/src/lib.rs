#![warn(missing_docs)]
//!# resmcs - Residual Multi-scale Conv-Stem Backbone
//!
//! A hierarchical vision transformer backbone for dense prediction,
//! built on [`burn`].
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d (+ ReLU)`` block.
//!   * [`layers::drop`] - drop path / stochastic depth, and depth rate tables.
//!   * [`layers::norm::channel_norm`] - channels-first layer norm.
//!   * [`layers::patching`] - conv stem, overlapping patch embed, pixel attention.
//!   * [`layers::pooling::attention_pool`] - depthwise conv pooling of attention heads.
//!   * [`layers::upsample`] - depthwise pixel-shuffle upsampling.
//! * [`models`] - complete model families.
//!   * [`models::resmcs`] - The `ResMCS` backbone.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub mod layers;

pub mod models;
pub mod utility;
