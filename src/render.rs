//! The two-phase shadow-mapping frame.
//!
//! Phase A renders every model from the light into the shadow map. Phase B
//! renders the same models from the camera, sampling the shadow map. Both
//! phases read one snapshot of [`DrawItem`]s so a model's matrices cannot
//! change in between.
//!
//! # Key types
//!
//! - [`ShadowMap`] is the off-screen depth target and its framebuffer
//! - [`DrawItem`] is one model resolved to GPU ids and matrices
//! - [`FrameState`] holds the per-frame camera and light uniforms

use cgmath::{Matrix4, Point3};

use crate::{
    context::{
        BufferId, ClearMask, Face, FramebufferId, FramebufferStatus, GraphicsContext, TextureId,
    },
    error::ConstructionError,
    pipelines::{depth::DepthProgram, lit::LitProgram},
};

/// Texture unit the lit pass reads the model's albedo from.
pub const ALBEDO_UNIT: u32 = 0;
/// Texture unit the lit pass reads the shadow map from.
pub const SHADOW_MAP_UNIT: u32 = 1;

/// Square depth-only render target written by the depth pass.
#[derive(Debug)]
pub struct ShadowMap {
    texture: TextureId,
    framebuffer: FramebufferId,
    size: u32,
}

impl ShadowMap {
    /// Fails if the framebuffer does not validate; nothing is left behind
    /// in that case.
    pub fn new(ctx: &mut impl GraphicsContext, size: u32) -> Result<Self, ConstructionError> {
        let texture = ctx.create_depth_texture(size);
        let framebuffer = ctx.create_depth_framebuffer(texture);
        match ctx.framebuffer_status(framebuffer) {
            FramebufferStatus::Complete => Ok(Self {
                texture,
                framebuffer,
                size,
            }),
            FramebufferStatus::Incomplete(reason) => {
                ctx.delete_framebuffer(framebuffer);
                ctx.delete_texture(texture);
                Err(ConstructionError::FramebufferIncomplete(reason))
            }
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn delete(self, ctx: &mut impl GraphicsContext) {
        ctx.delete_framebuffer(self.framebuffer);
        ctx.delete_texture(self.texture);
    }
}

/// One renderable model, resolved once per frame.
#[derive(Clone, Debug)]
pub struct DrawItem {
    pub buffer: BufferId,
    pub vertex_count: u32,
    pub texture: TextureId,
    pub shininess: f32,
    pub model_matrix: Matrix4<f32>,
    pub normal_matrix: Matrix4<f32>,
}

#[derive(Clone, Debug)]
pub struct FrameState {
    pub viewport: (u32, u32),
    pub projection_matrix: Matrix4<f32>,
    pub view_matrix: Matrix4<f32>,
    pub lightspace_matrix: Matrix4<f32>,
    pub camera_position: Point3<f32>,
    pub light_position: Point3<f32>,
}

/// Phase A: light's-eye depth into the shadow map, front faces culled.
pub fn shadow_pass(
    ctx: &mut impl GraphicsContext,
    depth: &DepthProgram,
    shadow_map: &ShadowMap,
    frame: &FrameState,
    items: &[DrawItem],
) {
    ctx.bind_framebuffer(Some(shadow_map.framebuffer));
    ctx.clear(ClearMask::DEPTH);
    ctx.viewport(shadow_map.size, shadow_map.size);
    ctx.cull_face(Face::Front);

    depth.program().use_program(ctx);
    depth.set_lightspace_matrix(ctx, &frame.lightspace_matrix);

    for item in items {
        depth.program().bind_vertex_layout(ctx, item.buffer);
        depth.set_model_matrix(ctx, &item.model_matrix);
        ctx.draw_triangles(0, item.vertex_count);
    }
}

/// Phase B: camera's-eye Phong shading on screen, back faces culled.
pub fn lit_pass(
    ctx: &mut impl GraphicsContext,
    lit: &LitProgram,
    shadow_map: &ShadowMap,
    frame: &FrameState,
    items: &[DrawItem],
) {
    ctx.bind_framebuffer(None);
    ctx.clear(ClearMask::COLOR_DEPTH);
    ctx.viewport(frame.viewport.0, frame.viewport.1);
    ctx.cull_face(Face::Back);

    lit.program().use_program(ctx);
    lit.set_texture_id(ctx, ALBEDO_UNIT as i32);
    lit.set_shadow_map_id(ctx, SHADOW_MAP_UNIT as i32);
    lit.set_projection_matrix(ctx, &frame.projection_matrix);
    lit.set_view_matrix(ctx, &frame.view_matrix);
    lit.set_lightspace_matrix(ctx, &frame.lightspace_matrix);
    lit.set_camera_position(ctx, frame.camera_position);
    lit.set_light_position(ctx, frame.light_position);
    ctx.bind_texture(SHADOW_MAP_UNIT, shadow_map.texture);

    for item in items {
        lit.program().bind_vertex_layout(ctx, item.buffer);
        ctx.bind_texture(ALBEDO_UNIT, item.texture);
        lit.set_shininess(ctx, item.shininess);
        lit.set_model_matrix(ctx, &item.model_matrix);
        lit.set_normal_matrix(ctx, &item.normal_matrix);
        ctx.draw_triangles(0, item.vertex_count);
    }
}
