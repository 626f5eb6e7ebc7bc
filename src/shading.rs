//! CPU transcription of the lit-pass fragment math.
//!
//! Uses the same constants as `lit.frag.wgsl`, so lighting and shadow
//! decisions can be checked without a GPU.

use cgmath::{InnerSpace, Point3, Vector2, Vector3, Vector4};

pub const AMBIENT: f32 = 0.2;
pub const DIFFUSE: f32 = 0.5;
pub const SPECULAR: f32 = 0.5;
/// Constant depth bias against shadow acne, no slope scaling.
pub const SHADOW_BIAS: f32 = 1e-3;
pub const LIGHT_COLOR: Vector3<f32> = Vector3::new(1.0, 1.0, 0.95);

/// Perspective divide then `[-1, 1]` to `[0, 1]`.
///
/// `None` when the position lies outside the light frustum.
pub fn project_to_shadow_map(lightspace_position: Vector4<f32>) -> Option<Vector3<f32>> {
    if lightspace_position.w <= 0.0 {
        return None;
    }
    let projected = lightspace_position.truncate() / lightspace_position.w * 0.5
        + Vector3::new(0.5, 0.5, 0.5);
    let inside = [projected.x, projected.y, projected.z]
        .iter()
        .all(|c| (0.0..=1.0).contains(c));
    inside.then_some(projected)
}

/// 1 when the fragment is the closest surface to the light, else 0.
///
/// `closest_depth` samples the shadow map at the projected `(x, y)`, in clip
/// orientation (y up).
pub fn shadow_factor(
    lightspace_position: Vector4<f32>,
    closest_depth: impl FnOnce(Vector2<f32>) -> f32,
) -> f32 {
    match project_to_shadow_map(lightspace_position) {
        Some(p) if p.z <= closest_depth(Vector2::new(p.x, p.y)) + SHADOW_BIAS => 1.0,
        _ => 0.0,
    }
}

/// Light intensity terms before light colour and albedo are applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhongTerms {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
}

impl PhongTerms {
    pub fn intensity(&self) -> f32 {
        self.ambient + self.diffuse + self.specular
    }

    /// Final fragment colour for an albedo sample.
    pub fn color(&self, albedo: Vector3<f32>) -> Vector3<f32> {
        let i = self.intensity();
        Vector3::new(
            i * LIGHT_COLOR.x * albedo.x,
            i * LIGHT_COLOR.y * albedo.y,
            i * LIGHT_COLOR.z * albedo.z,
        )
    }
}

pub fn phong_terms(
    world_position: Point3<f32>,
    normal: Vector3<f32>,
    camera_position: Point3<f32>,
    light_position: Point3<f32>,
    shininess: f32,
    lit: f32,
) -> PhongTerms {
    let normal = normal.normalize();
    let light_direction = (light_position - world_position).normalize();
    let view_direction = (camera_position - world_position).normalize();
    let reflected = reflect(-light_direction, normal);

    PhongTerms {
        ambient: AMBIENT,
        diffuse: lit * DIFFUSE * normal.dot(light_direction).max(0.0),
        specular: lit * SPECULAR * view_direction.dot(reflected).max(0.0).powf(shininess),
    }
}

/// GLSL/WGSL `reflect`: `i - 2 * dot(n, i) * n`.
fn reflect(incident: Vector3<f32>, normal: Vector3<f32>) -> Vector3<f32> {
    incident - normal * (2.0 * normal.dot(incident))
}
