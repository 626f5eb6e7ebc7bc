//! A headless [`GraphicsContext`] that records instead of rendering.
//!
//! Every call lands in an ordered [`Call`] log. Each draw additionally
//! produces a [`DrawRecord`] capturing the bound state at that moment, so
//! tests can ask "which program, framebuffer and cull face did draw N use"
//! without replaying the log themselves.
//!
//! Nothing here touches a GPU, so it doubles as test support for crates
//! that embed a [`crate::scene::Scene`]:
//!
//! ```
//! use penumbra::{Scene, context::recording::RecordingContext};
//!
//! let mut scene = Scene::new(RecordingContext::new(640, 480)).unwrap();
//! scene.render().unwrap();
//! assert!(scene.context().draws().is_empty());
//! assert_eq!(scene.context().live_programs(), 2);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use image::RgbaImage;
use slotmap::SlotMap;

use crate::{
    context::{
        BufferId, Capability, ClearMask, Face, FramebufferId, FramebufferStatus, GraphicsContext,
        ProgramDesc, ProgramId, TextureId, UniformLocation, UniformValue, VertexAttribute,
    },
    data_structures::texture::mip_level_count,
    error::RenderError,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateProgram { program: ProgramId, label: String },
    ValidateProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    SetUniform {
        location: UniformLocation,
        value: UniformValue,
    },
    CreateVertexBuffer { buffer: BufferId, bytes: usize },
    DeleteBuffer(BufferId),
    BindVertexBuffer(BufferId),
    VertexAttribute(VertexAttribute),
    CreateTexture {
        texture: TextureId,
        width: u32,
        height: u32,
        mip_levels: u32,
    },
    CreateDepthTexture { texture: TextureId, size: u32 },
    DeleteTexture(TextureId),
    BindTexture { unit: u32, texture: TextureId },
    CreateFramebuffer {
        framebuffer: FramebufferId,
        depth: TextureId,
    },
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    SetClearColor([f32; 4]),
    Clear(ClearMask),
    Viewport { width: u32, height: u32 },
    CullFace(Face),
    Draw { first: u32, count: u32 },
    ResizeSurface { width: u32, height: u32 },
    Flush,
}

/// Bound state captured at a draw call.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub cull_face: Option<Face>,
    pub viewport: (u32, u32),
    pub vertex_buffer: Option<BufferId>,
    pub attributes: Vec<VertexAttribute>,
    pub texture_units: BTreeMap<u32, TextureId>,
    pub uniforms: BTreeMap<UniformLocation, UniformValue>,
    pub first: u32,
    pub count: u32,
}

impl DrawRecord {
    /// The texture the active program samples through `location`, following
    /// the unit it was pointed at (unit 0 if never set).
    pub fn texture_for(&self, location: UniformLocation) -> Option<TextureId> {
        let unit = match self.uniforms.get(&location) {
            Some(UniformValue::Int(unit)) => *unit as u32,
            _ => 0,
        };
        self.texture_units.get(&unit).copied()
    }
}

#[derive(Debug)]
pub struct RecordingContext {
    calls: Vec<Call>,
    draws: Vec<DrawRecord>,
    missing: HashSet<Capability>,
    link_failure: Option<String>,
    validate_failure: Option<String>,
    incomplete_framebuffers: bool,
    max_texture_size: u32,
    lost: bool,
    surface: (u32, u32),

    programs: SlotMap<ProgramId, HashMap<UniformLocation, UniformValue>>,
    buffers: SlotMap<BufferId, usize>,
    /// Depth textures keep their side length.
    textures: SlotMap<TextureId, Option<u32>>,
    framebuffers: SlotMap<FramebufferId, TextureId>,

    program: Option<ProgramId>,
    vertex_buffer: Option<BufferId>,
    attributes: Vec<VertexAttribute>,
    texture_units: BTreeMap<u32, TextureId>,
    framebuffer: Option<FramebufferId>,
    viewport: (u32, u32),
    cull_face: Option<Face>,
}

impl RecordingContext {
    /// Matches wgpu's default `max_texture_dimension_2d`.
    pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            calls: Vec::new(),
            draws: Vec::new(),
            missing: HashSet::new(),
            link_failure: None,
            validate_failure: None,
            incomplete_framebuffers: false,
            max_texture_size: Self::DEFAULT_MAX_TEXTURE_SIZE,
            lost: false,
            surface: (width, height),
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            program: None,
            vertex_buffer: None,
            attributes: Vec::new(),
            texture_units: BTreeMap::new(),
            framebuffer: None,
            viewport: (0, 0),
            cull_face: None,
        }
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.missing.insert(capability);
        self
    }

    pub fn failing_link(mut self, log: impl Into<String>) -> Self {
        self.link_failure = Some(log.into());
        self
    }

    pub fn failing_validation(mut self, log: impl Into<String>) -> Self {
        self.validate_failure = Some(log.into());
        self
    }

    pub fn with_incomplete_framebuffers(mut self) -> Self {
        self.incomplete_framebuffers = true;
        self
    }

    /// Depth attachments wider than `size` report incomplete.
    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    /// Simulates the device going away.
    pub fn lose(&mut self) {
        self.lost = true;
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Empties both logs, keeping resources and bound state.
    pub fn clear_log(&mut self) {
        self.calls.clear();
        self.draws.clear();
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_live_buffer(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(buffer)
    }

    pub fn is_live_texture(&self, texture: TextureId) -> bool {
        self.textures.contains_key(texture)
    }
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GraphicsContext for RecordingContext {
    fn supports(&self, capability: Capability) -> bool {
        !self.missing.contains(&capability)
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
        self.calls.push(Call::ResizeSurface { width, height });
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.calls.push(Call::SetClearColor(color));
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId, String> {
        if let Some(log) = &self.link_failure {
            return Err(log.clone());
        }
        let program = self.programs.insert(HashMap::new());
        self.calls.push(Call::CreateProgram {
            program,
            label: desc.label.to_owned(),
        });
        Ok(program)
    }

    fn validate_program(&mut self, program: ProgramId) -> Result<(), String> {
        self.calls.push(Call::ValidateProgram(program));
        match &self.validate_failure {
            Some(log) => Err(log.clone()),
            None => Ok(()),
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        if self.program == Some(program) {
            self.program = None;
        }
        self.calls.push(Call::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
        self.calls.push(Call::UseProgram(program));
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if let Some(uniforms) = self.program.and_then(|p| self.programs.get_mut(p)) {
            uniforms.insert(location, value);
        }
        self.calls.push(Call::SetUniform { location, value });
    }

    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferId {
        let buffer = self.buffers.insert(data.len());
        self.calls.push(Call::CreateVertexBuffer {
            buffer,
            bytes: data.len(),
        });
        buffer
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer);
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
            self.attributes.clear();
        }
        self.calls.push(Call::DeleteBuffer(buffer));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        self.vertex_buffer = Some(buffer);
        self.attributes.clear();
        self.calls.push(Call::BindVertexBuffer(buffer));
    }

    fn vertex_attribute(&mut self, attribute: VertexAttribute) {
        self.attributes.retain(|a| a.location != attribute.location);
        self.attributes.push(attribute);
        self.calls.push(Call::VertexAttribute(attribute));
    }

    fn create_texture(&mut self, image: &RgbaImage) -> TextureId {
        let texture = self.textures.insert(None);
        self.calls.push(Call::CreateTexture {
            texture,
            width: image.width(),
            height: image.height(),
            mip_levels: mip_level_count(image.width(), image.height()),
        });
        texture
    }

    fn create_depth_texture(&mut self, size: u32) -> TextureId {
        let texture = self.textures.insert(Some(size));
        self.calls.push(Call::CreateDepthTexture { texture, size });
        texture
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
        self.texture_units.retain(|_, bound| *bound != texture);
        self.calls.push(Call::DeleteTexture(texture));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.texture_units.insert(unit, texture);
        self.calls.push(Call::BindTexture { unit, texture });
    }

    fn create_depth_framebuffer(&mut self, depth: TextureId) -> FramebufferId {
        let framebuffer = self.framebuffers.insert(depth);
        self.calls.push(Call::CreateFramebuffer { framebuffer, depth });
        framebuffer
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        if self.incomplete_framebuffers {
            return FramebufferStatus::Incomplete("missing depth attachment".to_owned());
        }
        let Some(depth) = self.framebuffers.get(framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_owned());
        };
        match self.textures.get(*depth) {
            Some(Some(size)) => {
                FramebufferStatus::of_depth_attachment(*size, self.max_texture_size)
            }
            Some(None) => FramebufferStatus::Incomplete("attachment is not a depth texture".to_owned()),
            None => FramebufferStatus::Incomplete("depth attachment was deleted".to_owned()),
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
        self.calls.push(Call::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.framebuffer = framebuffer;
        self.calls.push(Call::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, mask: ClearMask) {
        self.calls.push(Call::Clear(mask));
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.calls.push(Call::Viewport { width, height });
    }

    fn cull_face(&mut self, face: Face) {
        self.cull_face = Some(face);
        self.calls.push(Call::CullFace(face));
    }

    fn draw_triangles(&mut self, first: u32, count: u32) {
        let uniforms = self
            .program
            .and_then(|p| self.programs.get(p))
            .map(|u| u.iter().map(|(l, v)| (*l, *v)).collect())
            .unwrap_or_default();
        self.draws.push(DrawRecord {
            program: self.program,
            framebuffer: self.framebuffer,
            cull_face: self.cull_face,
            viewport: self.viewport,
            vertex_buffer: self.vertex_buffer,
            attributes: self.attributes.clone(),
            texture_units: self.texture_units.clone(),
            uniforms,
            first,
            count,
        });
        self.calls.push(Call::Draw { first, count });
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        self.calls.push(Call::Flush);
        if self.lost {
            return Err(RenderError::ContextLost);
        }
        Ok(())
    }
}
