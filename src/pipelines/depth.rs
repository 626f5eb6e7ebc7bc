//! Depth pass program: renders the scene from the light into the shadow map.

use cgmath::Matrix4;

use crate::{
    context::{GraphicsContext, UniformLocation, UniformType},
    error::ShaderError,
    pipelines::{ProgramSource, ShaderProgram, expect_type},
};

pub const SOURCE: ProgramSource = ProgramSource {
    label: "depth",
    vertex: include_str!("depth.vert.wgsl"),
    fragment: include_str!("depth.frag.wgsl"),
    attributes: &["position"],
    uniforms: &["lightspace_matrix", "model_matrix"],
};

#[derive(Debug)]
pub struct DepthProgram {
    program: ShaderProgram,
    lightspace_matrix: UniformLocation,
    model_matrix: UniformLocation,
}

impl DepthProgram {
    pub fn new(ctx: &mut impl GraphicsContext) -> Result<Self, ShaderError> {
        let program = ShaderProgram::new(ctx, &SOURCE)?;
        let mat4 = |name: &str| {
            program
                .uniform_location(name)
                .and_then(|loc| expect_type(&program, name, loc, UniformType::Mat4))
        };
        match (mat4("lightspace_matrix"), mat4("model_matrix")) {
            (Ok(lightspace_matrix), Ok(model_matrix)) => Ok(Self {
                program,
                lightspace_matrix,
                model_matrix,
            }),
            (Err(e), _) | (_, Err(e)) => {
                program.delete(ctx);
                Err(e)
            }
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn set_lightspace_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.lightspace_matrix, m);
    }

    pub fn set_model_matrix(&self, ctx: &mut impl GraphicsContext, m: &Matrix4<f32>) {
        self.program.set_matrix4(ctx, self.model_matrix, m);
    }

    pub fn delete(self, ctx: &mut impl GraphicsContext) {
        self.program.delete(ctx);
    }
}
