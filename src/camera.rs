//! Camera, projection and light transforms.
//!
//! All matrices use GL clip-space conventions (depth in `[-w, w]`); the
//! vertex stages remap depth for the backend.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3, perspective};

/// A free camera with pitch and yaw, no roll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub pitch: Rad<f32>,
    pub yaw: Rad<f32>,
}

impl Camera {
    pub fn new<V: Into<Point3<f32>>, P: Into<Rad<f32>>, Y: Into<Rad<f32>>>(
        position: V,
        pitch: P,
        yaw: Y,
    ) -> Self {
        Self {
            position: position.into(),
            pitch: pitch.into(),
            yaw: yaw.into(),
        }
    }

    /// `Rx(-pitch) · Ry(yaw) · T(-position)`
    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_angle_x(-self.pitch)
            * Matrix4::from_angle_y(self.yaw)
            * Matrix4::from_translation(-self.position.to_vec())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Point3::origin(), Rad(0.0), Rad(0.0))
    }
}

/// Symmetric perspective projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub fovy: Rad<f32>,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(fovy: F, aspect: f32, znear: f32, zfar: f32) -> Self {
        Self {
            fovy: fovy.into(),
            aspect,
            znear,
            zfar,
        }
    }

    /// Aspect ratio of a `width`×`height` surface. A zero side counts as 1,
    /// so the result is always finite and positive.
    pub fn aspect_of(width: u32, height: u32) -> f32 {
        width.max(1) as f32 / height.max(1) as f32
    }

    /// Whether [`Projection::matrix`] can be built: the field of view lies in
    /// `(0, π)`, the aspect is positive and `0 < znear < zfar`.
    pub fn is_valid(&self) -> bool {
        let fovy = self.fovy.0;
        fovy.is_finite()
            && fovy > 0.0
            && fovy < std::f32::consts::PI
            && self.aspect.is_finite()
            && self.aspect > 0.0
            && self.znear.is_finite()
            && self.znear > 0.0
            && self.zfar.is_finite()
            && self.zfar > self.znear
    }

    pub fn matrix(&self) -> Matrix4<f32> {
        perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// The single point light. It always looks at the world origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub position: Point3<f32>,
    pub projection: Projection,
}

impl Light {
    pub const UP: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);
    /// Up vector used when the light sits on the Y axis through the origin.
    pub const FALLBACK_UP: Vector3<f32> = Vector3::new(0.0, 0.0, -1.0);

    pub fn view_matrix(&self) -> Matrix4<f32> {
        let direction = Point3::origin() - self.position;
        let up = if direction.cross(Self::UP).magnitude2() <= f32::EPSILON {
            Self::FALLBACK_UP
        } else {
            Self::UP
        };
        Matrix4::look_at_rh(self.position, Point3::origin(), up)
    }

    /// `light_projection · light_view`
    pub fn lightspace_matrix(&self) -> Matrix4<f32> {
        self.projection.matrix() * self.view_matrix()
    }
}
