//! Model transforms.
//!
//! A model's world transform is always derived from its position, rotation
//! and uniform scale, never stored. Both render phases ask for the matrices
//! once per frame and reuse them.

use cgmath::{Matrix, Matrix4, One, Quaternion, SquareMatrix, Vector3, Zero};

/// Position, rotation and uniform scale of one model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: Vector3<f32>,
    /// Expected to be a unit quaternion.
    pub rotation: Quaternion<f32>,
    pub scale: f32,
}

impl Instance {
    /// Create a new instance with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::zero(),
            // `Quaternion::one()` is the identity quaternion (no rotation)
            rotation: Quaternion::one(),
            scale: 1.0,
        }
    }

    /// `T(position) · R(rotation) · S(scale)`
    pub fn model_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_scale(self.scale)
    }

    /// `transpose(inverse(model_matrix))`.
    ///
    /// A zero scale makes the model matrix singular; the identity is returned
    /// in that case since the model covers no area anyway.
    pub fn normal_matrix(&self) -> Matrix4<f32> {
        normal_matrix(&self.model_matrix())
    }
}

pub fn normal_matrix(model: &Matrix4<f32>) -> Matrix4<f32> {
    model
        .invert()
        .map(|inverse| inverse.transpose())
        .unwrap_or_else(Matrix4::identity)
}

impl From<Vector3<f32>> for Instance {
    fn from(position: Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}
