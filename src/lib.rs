//! penumbra
//!
//! A small shadow-mapped scene renderer. Textured models are lit by a single
//! point light with Phong shading; a depth pass from the light's point of
//! view decides which fragments the light actually reaches.
//!
//! High-level modules
//! - `camera`: camera, projection and light transforms
//! - `config`: scene and wgpu backend settings
//! - `context`: the explicit binding-state trait, a wgpu backend and a
//!   recording backend for tests
//! - `data_structures`: vertex layout, model transforms and textures
//! - `error`: construction, scene and render errors
//! - `logging`: one-shot `env_logger` setup
//! - `pipelines`: shader programs for the depth and lit passes
//! - `render`: the two-phase frame protocol
//! - `scene`: handles, models and the per-frame `render` call
//! - `shading`: CPU mirror of the lit-pass fragment math
//!

pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod logging;
pub mod pipelines;
pub mod render;
pub mod scene;
pub mod shading;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use image::RgbaImage;
pub use scene::{Mesh, Model, Scene, Texture};
