//! Lit pass program: Phong shading with a shadow-map lookup.
//!
//! The fragment math is mirrored on the CPU in [`crate::shading`].

use cgmath::{EuclideanSpace, Matrix4, Point3};

use crate::{
    context::{GraphicsContext, UniformLocation, UniformType},
    error::ShaderError,
    pipelines::{ProgramSource, ShaderProgram, expect_type},
};

pub const SOURCE: ProgramSource = ProgramSource {
    label: "lit",
    vertex: include_str!("lit.vert.wgsl"),
    fragment: include_str!("lit.frag.wgsl"),
    attributes: &["position", "normal", "texture_coord"],
    uniforms: &[
        "projection_matrix",
        "view_matrix",
        "model_matrix",
        "normal_matrix",
        "lightspace_matrix",
        "camera_position",
        "light_position",
        "shininess",
        "texture_id",
        "shadow_map_id",
    ],
};

#[derive(Debug)]
pub struct LitProgram {
    program: ShaderProgram,
    projection_matrix: UniformLocation,
    view_matrix: UniformLocation,
    model_matrix: UniformLocation,
    normal_matrix: UniformLocation,
    lightspace_matrix: UniformLocation,
    camera_position: UniformLocation,
    light_position: UniformLocation,
    shininess: UniformLocation,
    texture_id: UniformLocation,
    shadow_map_id: UniformLocation,
}

impl LitProgram {
    pub fn new(ctx: &mut impl GraphicsContext) -> Result<Self, ShaderError> {
        let program = ShaderProgram::new(ctx, &SOURCE)?;
        match Self::locate(program) {
            Ok(lit) => Ok(lit),
            Err((program, e)) => {
                program.delete(ctx);
                Err(e)
            }
        }
    }

    fn locate(program: ShaderProgram) -> Result<Self, (ShaderProgram, ShaderError)> {
        let typed = |name: &str, ty| {
            program
                .uniform_location(name)
                .and_then(|loc| expect_type(&program, name, loc, ty))
        };
        let located = (|| {
            Ok::<_, ShaderError>([
                typed("projection_matrix", UniformType::Mat4)?,
                typed("view_matrix", UniformType::Mat4)?,
                typed("model_matrix", UniformType::Mat4)?,
                typed("normal_matrix", UniformType::Mat4)?,
                typed("lightspace_matrix", UniformType::Mat4)?,
                typed("camera_position", UniformType::Vec3)?,
                typed("light_position", UniformType::Vec3)?,
                typed("shininess", UniformType::Float)?,
                typed("texture_id", UniformType::Int)?,
                typed("shadow_map_id", UniformType::Int)?,
            ])
        })();
        match located {
            Ok(
                [
                    projection_matrix,
                    view_matrix,
                    model_matrix,
                    normal_matrix,
                    lightspace_matrix,
                    camera_position,
                    light_position,
                    shininess,
                    texture_id,
                    shadow_map_id,
                ],
            ) => Ok(Self {
                program,
                projection_matrix,
                view_matrix,
                model_matrix,
                normal_matrix,
                lightspace_matrix,
                camera_position,
                light_position,
                shininess,
                texture_id,
                shadow_map_id,
            }),
            Err(e) => Err((program, e)),
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn set_projection_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.projection_matrix, m);
    }

    pub fn set_view_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.view_matrix, m);
    }

    pub fn set_model_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.model_matrix, m);
    }

    pub fn set_normal_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.normal_matrix, m);
    }

    pub fn set_lightspace_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.lightspace_matrix, m);
    }

    pub fn set_camera_position(&self, ctx: &mut impl GraphicsContext, p: Point3<f32>) {
        self.program.set_vec3(ctx, self.camera_position, p.to_vec());
    }

    pub fn set_light_position(&self, ctx: &mut impl GraphicsContext, p: Point3<f32>) {
        self.program.set_vec3(ctx, self.light_position, p.to_vec());
    }

    pub fn set_shininess(&self, ctx: &mut impl GraphicsContext, shininess: f32) {
        self.program.set_float(ctx, self.shininess, shininess);
    }

    /// Texture unit the albedo texture is read from.
    pub fn set_texture_id(&self, ctx: &mut impl GraphicsContext, unit: i32) {
        self.program.set_int(ctx, self.texture_id, unit);
    }

    /// Texture unit the shadow map is read from.
    pub fn set_shadow_map_id(&self, ctx: &mut impl GraphicsContext, unit: i32) {
        self.program.set_int(ctx, self.shadow_map_id, unit);
    }

    pub fn delete(self, ctx: &mut impl GraphicsContext) {
        self.program.delete(ctx);
    }
}
