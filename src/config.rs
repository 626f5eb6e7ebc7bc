//! Scene configuration.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use cgmath::{Point3, Rad};

use crate::camera::Projection;

/// Values fixed when a [`crate::scene::Scene`] is built.
///
/// The defaults reproduce the classic demo setup: a 1600×1600 shadow map, a
/// black background and a 90° light frustum reaching 100 units.
#[derive(Clone, Debug)]
pub struct SceneConfig {
    /// Side length of the square shadow map in texels.
    pub shadow_map_size: u32,
    pub clear_color: [f32; 4],
    /// Camera near and far planes.
    pub near: f32,
    pub far: f32,
    pub light_projection: Projection,
    pub light_position: Point3<f32>,
    /// Vertical field of view used until the first `set_projection`.
    pub fovy: Rad<f32>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            shadow_map_size: 1600,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            near: 1.0,
            far: 1000.0,
            light_projection: Projection::new(Rad(FRAC_PI_2), 1.0, 1.0, 100.0),
            light_position: Point3::new(0.0, 5.0, 1.0),
            fovy: Rad(FRAC_PI_4),
        }
    }
}

/// Initialization parameters for [`crate::context::wgpu_backend::WgpuContext`].
#[derive(Debug, Clone)]
pub struct WgpuInit {
    pub power_preference: wgpu::PowerPreference,
    /// Prefer an sRGB surface format when available.
    pub prefer_srgb: bool,
    pub present_mode: wgpu::PresentMode,
    pub required_limits: wgpu::Limits,
    /// A hint; support depends on platform and backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::default(),
            prefer_srgb: true,
            present_mode: wgpu::PresentMode::Fifo,
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
        }
    }
}
