// src/nn/mod.rs
// Learnable parameters and the module trait that exposes them.

pub mod module;
pub mod parameter;

pub use module::{bind_parameters, collect_parameters, for_each_parameter, zero_grad, Module};
pub use parameter::Parameter;
