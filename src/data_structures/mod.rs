//! Engine data structures: vertex layout, model transforms and textures.
//!
//! - `instance` holds per-model position, rotation and scale
//! - `model` fixes the interleaved vertex layout and the model record
//! - `texture` contains the wgpu texture wrapper and mip chain generation

pub mod instance;
pub mod model;
pub mod texture;
