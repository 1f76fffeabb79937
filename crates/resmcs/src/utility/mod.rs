//! # Utility Support Functions
//!
//! This module exists to support developing `resmcs` modules.

pub mod probability;
pub mod results;
