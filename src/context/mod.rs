//! Explicit GPU binding state.
//!
//! Graphics APIs keep an implicit "currently bound" program, buffer, texture
//! unit and framebuffer. [`GraphicsContext`] turns that state into method
//! calls on a value the caller owns, so every pass states exactly what it
//! binds. Two implementations ship with the crate:
//!
//! - [`wgpu_backend::WgpuContext`] records the calls and replays them as wgpu render
//!   passes on `flush`, into a window surface or an offscreen target
//! - [`recording::RecordingContext`] is headless and keeps a log of every call.
//!   It is public test support: the crate's integration tests assert against
//!   it, and downstream crates can drive a `Scene` with it without a GPU

use std::fmt;

use image::RgbaImage;

use crate::error::RenderError;

pub mod recording;
pub mod wgpu_backend;

slotmap::new_key_type! {
    pub struct ProgramId;
    pub struct BufferId;
    pub struct TextureId;
    pub struct FramebufferId;
}

/// Optional features a context may lack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Depth textures that can be rendered into and sampled afterwards.
    DepthTexture,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::DepthTexture => f.write_str("sampled depth textures"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const DEPTH: ClearMask = ClearMask {
        color: false,
        depth: true,
    };
    pub const COLOR_DEPTH: ClearMask = ClearMask {
        color: true,
        depth: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.color && !self.depth
    }
}

impl std::ops::BitOr for ClearMask {
    type Output = ClearMask;

    fn bitor(self, rhs: ClearMask) -> ClearMask {
        ClearMask {
            color: self.color || rhs.color,
            depth: self.depth || rhs.depth,
        }
    }
}

impl std::ops::BitOrAssign for ClearMask {
    fn bitor_assign(&mut self, rhs: ClearMask) {
        *self = *self | rhs;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

impl FramebufferStatus {
    /// Status of a square depth attachment `size` texels wide on a device
    /// whose 2D textures may be at most `max` texels wide.
    pub fn of_depth_attachment(size: u32, max: u32) -> Self {
        if size == 0 {
            FramebufferStatus::Incomplete("depth attachment has zero size".to_owned())
        } else if size > max {
            FramebufferStatus::Incomplete(format!(
                "depth attachment of {size}px exceeds the {max}px texture limit"
            ))
        } else {
            FramebufferStatus::Complete
        }
    }
}

/// Data type of a uniform as declared by the shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

/// Where a uniform lives inside a linked program.
///
/// Plain values are members of the program's uniform block. Textures are
/// resource bindings; setting an `Int` on them selects the texture unit they
/// read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformLocation {
    Block { offset: u32, ty: UniformType },
    Texture { binding: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    /// Bytes as they sit in a std140-style uniform block (matrices column-major).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Mat4(m) => bytemuck::cast_slice(&m[..]).to_vec(),
        }
    }
}

/// One enabled float attribute of the bound vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u32,
    pub stride: u64,
    pub offset: u64,
}

/// A texture resource read by a program: `binding` in group 1, with its
/// sampler at `binding + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub binding: u32,
    pub depth: bool,
}

/// Everything a backend needs to turn two checked stage sources into a program.
#[derive(Clone, Debug)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub vertex_source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_source: &'a str,
    pub fragment_entry: &'a str,
    pub uniform_block_size: u32,
    pub textures: &'a [TextureSlot],
}

/// The binder every rendering operation goes through.
///
/// Calls are synchronous from the caller's point of view. State set through
/// one call (active program, bound buffer, texture units, framebuffer,
/// viewport, cull face) stays in effect until changed, exactly like the
/// global state of a GL context.
pub trait GraphicsContext {
    fn supports(&self, capability: Capability) -> bool;

    /// Once true, stays true. Nothing recorded afterwards reaches the screen.
    fn is_lost(&self) -> bool;

    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    fn set_clear_color(&mut self, color: [f32; 4]);

    /// Links two compiled stages. `Err` carries the backend's log.
    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId, String>;

    fn validate_program(&mut self, program: ProgramId) -> Result<(), String>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    /// Writes to the active program.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferId;

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Binds `buffer` and disables every attribute enabled for the previous one.
    fn bind_vertex_buffer(&mut self, buffer: BufferId);

    fn vertex_attribute(&mut self, attribute: VertexAttribute);

    /// Uploads an RGBA8 image with a full mip chain.
    fn create_texture(&mut self, image: &RgbaImage) -> TextureId;

    fn create_depth_texture(&mut self, size: u32) -> TextureId;

    fn delete_texture(&mut self, texture: TextureId);

    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn create_depth_framebuffer(&mut self, depth: TextureId) -> FramebufferId;

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// `None` selects the on-screen framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn clear(&mut self, mask: ClearMask);

    fn viewport(&mut self, width: u32, height: u32);

    fn cull_face(&mut self, face: Face);

    fn draw_triangles(&mut self, first: u32, count: u32);

    /// Hands everything recorded since the last flush to the device.
    fn flush(&mut self) -> Result<(), RenderError>;
}

impl<C: GraphicsContext + ?Sized> GraphicsContext for &mut C {
    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    fn is_lost(&self) -> bool {
        (**self).is_lost()
    }

    fn surface_size(&self) -> (u32, u32) {
        (**self).surface_size()
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        (**self).resize_surface(width, height)
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        (**self).set_clear_color(color)
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId, String> {
        (**self).create_program(desc)
    }

    fn validate_program(&mut self, program: ProgramId) -> Result<(), String> {
        (**self).validate_program(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        (**self).delete_program(program)
    }

    fn use_program(&mut self, program: ProgramId) {
        (**self).use_program(program)
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        (**self).set_uniform(location, value)
    }

    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferId {
        (**self).create_vertex_buffer(data)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        (**self).delete_buffer(buffer)
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        (**self).bind_vertex_buffer(buffer)
    }

    fn vertex_attribute(&mut self, attribute: VertexAttribute) {
        (**self).vertex_attribute(attribute)
    }

    fn create_texture(&mut self, image: &RgbaImage) -> TextureId {
        (**self).create_texture(image)
    }

    fn create_depth_texture(&mut self, size: u32) -> TextureId {
        (**self).create_depth_texture(size)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        (**self).delete_texture(texture)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        (**self).bind_texture(unit, texture)
    }

    fn create_depth_framebuffer(&mut self, depth: TextureId) -> FramebufferId {
        (**self).create_depth_framebuffer(depth)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        (**self).framebuffer_status(framebuffer)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).delete_framebuffer(framebuffer)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        (**self).bind_framebuffer(framebuffer)
    }

    fn clear(&mut self, mask: ClearMask) {
        (**self).clear(mask)
    }

    fn viewport(&mut self, width: u32, height: u32) {
        (**self).viewport(width, height)
    }

    fn cull_face(&mut self, face: Face) {
        (**self).cull_face(face)
    }

    fn draw_triangles(&mut self, first: u32, count: u32) {
        (**self).draw_triangles(first, count)
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        (**self).flush()
    }
}
