//! # Model Families

pub mod resmcs;
