//! Provider contract, boxed dispatch wrapper and the model registry.

pub mod box_provider;
pub mod provider;
pub mod registry;
