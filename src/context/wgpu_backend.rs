//! wgpu implementation of [`GraphicsContext`].
//!
//! Binding calls only update state. Each draw snapshots that state (program,
//! vertex layout, texture units, uniform values) into the current pass; a
//! `bind_framebuffer` starts a new pass. [`WgpuContext::flush`] turns the
//! recorded passes into wgpu render passes inside one command encoder:
//!
//! - every draw's uniform block is packed into one buffer and bound with a
//!   dynamic offset
//! - pipelines are created on first use and cached per program, target,
//!   cull face and vertex layout
//!
//! The screen is either a window surface ([`WgpuContext::new`]) or an
//! offscreen colour texture ([`WgpuContext::headless`]) that
//! [`WgpuContext::read_pixels`] copies back to the CPU.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use image::RgbaImage;
use slotmap::{SecondaryMap, SlotMap};
use wgpu::util::DeviceExt;

use crate::{
    config::WgpuInit,
    context::{
        BufferId, Capability, ClearMask, Face, FramebufferId, FramebufferStatus, GraphicsContext,
        ProgramDesc, ProgramId, TextureId, TextureSlot, UniformLocation, UniformValue,
        VertexAttribute,
    },
    data_structures::texture::Texture,
    error::RenderError,
    pipelines::reflect::{TEXTURE_GROUP, UNIFORM_GROUP},
};

#[derive(Debug)]
struct GpuProgram {
    label: String,
    vertex: wgpu::ShaderModule,
    vertex_entry: String,
    fragment: wgpu::ShaderModule,
    fragment_entry: String,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    textures: Vec<TextureSlot>,
    /// Current contents of the uniform block.
    uniform_data: Vec<u8>,
    /// Texture binding to texture unit; unset bindings read unit 0.
    texture_units: HashMap<u32, u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Target {
    Screen,
    Depth,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    target: Target,
    cull: Face,
    attributes: Vec<VertexAttribute>,
}

#[derive(Debug)]
struct RecordedDraw {
    program: ProgramId,
    cull: Face,
    viewport: (u32, u32),
    vertex_buffer: BufferId,
    attributes: Vec<VertexAttribute>,
    uniform_data: Vec<u8>,
    /// One texture per program texture slot, in slot order.
    textures: Vec<TextureId>,
    first: u32,
    count: u32,
}

#[derive(Debug)]
struct RecordedPass<D = RecordedDraw> {
    framebuffer: Option<FramebufferId>,
    clear: ClearMask,
    draws: Vec<D>,
}

/// Splits binder calls into render passes. A pass ends when a framebuffer
/// is bound, or when a clear follows draws.
#[derive(Debug)]
struct PassLog<D> {
    passes: Vec<RecordedPass<D>>,
}

impl<D> PassLog<D> {
    fn new() -> Self {
        Self { passes: Vec::new() }
    }

    fn bind(&mut self, framebuffer: Option<FramebufferId>) {
        self.passes.push(RecordedPass {
            framebuffer,
            clear: ClearMask::default(),
            draws: Vec::new(),
        });
    }

    fn clear(&mut self, framebuffer: Option<FramebufferId>, mask: ClearMask) {
        match self.passes.last_mut() {
            Some(pass) if pass.framebuffer == framebuffer && pass.draws.is_empty() => {
                pass.clear |= mask;
            }
            _ => self.passes.push(RecordedPass {
                framebuffer,
                clear: mask,
                draws: Vec::new(),
            }),
        }
    }

    fn draw(&mut self, framebuffer: Option<FramebufferId>, draw: D) {
        if self.passes.last().is_none_or(|p| p.framebuffer != framebuffer) {
            self.bind(framebuffer);
        }
        if let Some(pass) = self.passes.last_mut() {
            pass.draws.push(draw);
        }
    }

    /// Everything recorded so far, minus passes that neither clear nor draw.
    fn take(&mut self) -> Vec<RecordedPass<D>> {
        std::mem::take(&mut self.passes)
            .into_iter()
            .filter(|p| !p.draws.is_empty() || !p.clear.is_empty())
            .collect()
    }
}

/// Where the on-screen framebuffer lives.
#[derive(Debug)]
enum Output {
    Surface(wgpu::Surface<'static>),
    Offscreen(Texture),
}

#[derive(Debug)]
pub struct WgpuContext {
    output: Output,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth_texture_supported: bool,
    lost: Arc<AtomicBool>,
    screen_depth: Texture,
    color_sampler: wgpu::Sampler,
    depth_sampler: wgpu::Sampler,
    clear_color: wgpu::Color,

    programs: SlotMap<ProgramId, GpuProgram>,
    buffers: SlotMap<BufferId, wgpu::Buffer>,
    textures: SlotMap<TextureId, Texture>,
    /// Requested side length of each depth texture.
    depth_sizes: SecondaryMap<TextureId, u32>,
    framebuffers: SlotMap<FramebufferId, TextureId>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    program: Option<ProgramId>,
    vertex_buffer: Option<BufferId>,
    attributes: Vec<VertexAttribute>,
    texture_units: BTreeMap<u32, TextureId>,
    framebuffer: Option<FramebufferId>,
    viewport: (u32, u32),
    cull: Face,
    passes: PassLog<RecordedDraw>,
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    })
}

async fn request_device(
    adapter: &wgpu::Adapter,
    init: &WgpuInit,
) -> Result<(wgpu::Device, wgpu::Queue)> {
    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("penumbra device"),
            required_features: wgpu::Features::empty(),
            required_limits: init.required_limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        })
        .await
        .context("failed to create wgpu device/queue")
}

impl WgpuContext {
    /// Creates the device and configures a surface for `target`.
    pub async fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        init: WgpuInit,
    ) -> Result<Self> {
        anyhow::ensure!(width > 0 && height > 0, "surface has zero size");

        let instance = create_instance();
        let surface = instance
            .create_surface(target)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter, &init).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !init.prefer_srgb || f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("no supported surface formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: init.present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);
        log::info!("surface configured: {format:?} {width}x{height}");

        Ok(Self::assemble(
            &adapter,
            device,
            queue,
            Output::Surface(surface),
            config,
        ))
    }

    /// Creates the device without a window. The screen is a `width`×`height`
    /// colour texture; read it back with [`WgpuContext::read_pixels`].
    pub async fn headless(width: u32, height: u32, init: WgpuInit) -> Result<Self> {
        anyhow::ensure!(width > 0 && height > 0, "offscreen target has zero size");

        let instance = create_instance();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter, &init).await?;

        let format = if init.prefer_srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            format,
            width,
            height,
            present_mode: init.present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        let target =
            Texture::create_render_target(&device, [width, height], format, "offscreen target");
        log::info!("offscreen target created: {format:?} {width}x{height}");

        Ok(Self::assemble(
            &adapter,
            device,
            queue,
            Output::Offscreen(target),
            config,
        ))
    }

    fn assemble(
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        output: Output,
        config: wgpu::SurfaceConfiguration,
    ) -> Self {
        let depth_features = adapter.get_texture_format_features(Texture::DEPTH_FORMAT);
        let depth_texture_supported = depth_features.allowed_usages.contains(
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );

        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::SeqCst);
        });

        let screen_depth =
            Texture::create_depth_texture(&device, [config.width, config.height], "screen depth");
        let color_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("color sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        let depth_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow map sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });
        let viewport = (config.width, config.height);

        Self {
            output,
            device,
            queue,
            config,
            depth_texture_supported,
            lost,
            screen_depth,
            color_sampler,
            depth_sampler,
            clear_color: wgpu::Color::BLACK,
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            depth_sizes: SecondaryMap::new(),
            framebuffers: SlotMap::with_key(),
            pipelines: HashMap::new(),
            program: None,
            vertex_buffer: None,
            attributes: Vec::new(),
            texture_units: BTreeMap::new(),
            framebuffer: None,
            viewport,
            cull: Face::Back,
            passes: PassLog::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Copies the offscreen target into an image, top row first. Call it
    /// after [`GraphicsContext::flush`]. Window surfaces cannot be read back.
    pub async fn read_pixels(&self) -> Result<RgbaImage> {
        let Output::Offscreen(target) = &self.output else {
            anyhow::bail!("only headless contexts can read back their pixels");
        };
        let (width, height) = target.size;
        let unpadded_row = width * 4;
        let padded_row = align_up(
            unpadded_row.into(),
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT.into(),
        ) as u32;

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: (padded_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Map first, then poll, then await; awaiting before the poll never resolves.
        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only goes away if read_pixels already returned.
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .context("failed to wait for the readback copy")?;
        rx.receive()
            .await
            .context("readback was cancelled")?
            .context("failed to map the readback buffer")?;

        let pixels = {
            let data = buffer_slice.get_mapped_range();
            data.chunks(padded_row as usize)
                .flat_map(|row| &row[..unpadded_row as usize])
                .copied()
                .collect::<Vec<u8>>()
        };
        output_buffer.unmap();
        RgbaImage::from_raw(width, height, pixels).context("readback has the wrong length")
    }

    fn target_size(&self, framebuffer: Option<FramebufferId>) -> Option<(u32, u32)> {
        match framebuffer {
            None => Some((self.config.width, self.config.height)),
            Some(fb) => self
                .framebuffers
                .get(fb)
                .and_then(|depth| self.textures.get(*depth))
                .map(|t| t.size),
        }
    }

    /// Surface texture for this frame. `Ok(None)` skips the frame.
    fn acquire(
        &self,
        surface: &wgpu::Surface<'static>,
    ) -> Result<Option<wgpu::SurfaceTexture>, RenderError> {
        match surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost or outdated, reconfiguring");
                surface.configure(&self.device, &self.config);
                match surface.get_current_texture() {
                    Ok(frame) => Ok(Some(frame)),
                    Err(e) => self.surface_failure(e),
                }
            }
            Err(e) => self.surface_failure(e),
        }
    }

    fn surface_failure(&self, e: wgpu::SurfaceError) -> Result<Option<wgpu::SurfaceTexture>, RenderError> {
        match e {
            wgpu::SurfaceError::OutOfMemory => {
                log::error!("surface out of memory, treating the context as lost");
                self.lost.store(true, Ordering::SeqCst);
                Err(RenderError::ContextLost)
            }
            other => {
                log::warn!("skipping frame: {other}");
                Ok(None)
            }
        }
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) {
        if self.pipelines.contains_key(key) {
            return;
        }
        let Some(program) = self.programs.get(key.program) else {
            return;
        };
        let pipeline = mk_render_pipeline(
            &self.device,
            program,
            match key.target {
                Target::Screen => Some(self.config.format),
                Target::Depth => None,
            },
            key.cull,
            &key.attributes,
        );
        log::debug!(
            "created pipeline for `{}` ({:?}, cull {:?})",
            program.label,
            key.target,
            key.cull
        );
        self.pipelines.insert(key.clone(), pipeline);
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Packs uniform blocks into one buffer, each starting at a multiple of
/// `alignment`. Returns the bytes and each block's offset. The buffer is
/// never empty, so it can always be bound.
fn pack_uniforms<'a>(
    blocks: impl IntoIterator<Item = &'a [u8]>,
    alignment: u64,
) -> (Vec<u8>, Vec<u32>) {
    let mut bytes: Vec<u8> = Vec::new();
    let mut offsets = Vec::new();
    for block in blocks {
        let offset = align_up(bytes.len() as u64, alignment);
        bytes.resize(offset as usize, 0);
        bytes.extend_from_slice(block);
        offsets.push(offset as u32);
    }
    bytes.resize(align_up(bytes.len().max(1) as u64, alignment) as usize, 0);
    (bytes, offsets)
}

/// The texture each program slot reads, following the slot's unit
/// assignment (unit 0 when unset) to whatever is bound there.
fn resolve_textures(
    slots: &[TextureSlot],
    slot_units: &HashMap<u32, u32>,
    bound: &BTreeMap<u32, TextureId>,
) -> Result<Vec<TextureId>, String> {
    slots
        .iter()
        .map(|slot| {
            let unit = slot_units.get(&slot.binding).copied().unwrap_or(0);
            bound
                .get(&unit)
                .copied()
                .ok_or_else(|| format!("`{}` reads texture unit {unit}, which is empty", slot.name))
        })
        .collect()
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn mk_render_pipeline(
    device: &wgpu::Device,
    program: &GpuProgram,
    color_format: Option<wgpu::TextureFormat>,
    cull: Face,
    attributes: &[VertexAttribute],
) -> wgpu::RenderPipeline {
    let vertex_attributes: Vec<wgpu::VertexAttribute> = attributes
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: vertex_format(a.components),
            offset: a.offset,
            shader_location: a.location,
        })
        .collect();
    let stride = attributes.first().map(|a| a.stride).unwrap_or(0);
    let buffers = [wgpu::VertexBufferLayout {
        array_stride: stride,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &vertex_attributes,
    }];
    let color_targets = color_format.map(|format| {
        [Some(wgpu::ColorTargetState {
            format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })]
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&program.label),
        layout: Some(&program.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some(&program.vertex_entry),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: Some(&program.fragment_entry),
            targets: color_targets.as_ref().map(|t| &t[..]).unwrap_or(&[]),
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(match cull {
                Face::Front => wgpu::Face::Front,
                Face::Back => wgpu::Face::Back,
            }),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: Texture::DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn compilation_errors(module: &wgpu::ShaderModule) -> Vec<String> {
    pollster::block_on(module.get_compilation_info())
        .messages
        .into_iter()
        .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
        .map(|m| m.message)
        .collect()
}

impl GraphicsContext for WgpuContext {
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::DepthTexture => self.depth_texture_supported,
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// wgpu cannot configure a 0×0 surface; such sizes are ignored.
    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        match &mut self.output {
            Output::Surface(surface) => surface.configure(&self.device, &self.config),
            Output::Offscreen(target) => {
                *target = Texture::create_render_target(
                    &self.device,
                    [width, height],
                    self.config.format,
                    "offscreen target",
                )
            }
        }
        self.screen_depth =
            Texture::create_depth_texture(&self.device, [width, height], "screen depth");
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        let [r, g, b, a] = color.map(f64::from);
        self.clear_color = wgpu::Color { r, g, b, a };
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId, String> {
        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.vertex_source.into()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.fragment_source.into()),
        });
        let errors: Vec<String> = compilation_errors(&vertex)
            .into_iter()
            .chain(compilation_errors(&fragment))
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = wgpu::BufferSize::new(
            desc.uniform_block_size.into(),
        )
        .map(|size| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: Some(size),
            },
            count: None,
        })
        .into_iter()
        .collect();
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform_bind_group_layout"),
                entries: &uniform_entries,
            });

        let texture_layout = (!desc.textures.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
                .textures
                .iter()
                .flat_map(|slot| {
                    let (sample_type, sampler) = if slot.depth {
                        (
                            wgpu::TextureSampleType::Depth,
                            wgpu::SamplerBindingType::NonFiltering,
                        )
                    } else {
                        (
                            wgpu::TextureSampleType::Float { filterable: true },
                            wgpu::SamplerBindingType::Filtering,
                        )
                    };
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: slot.binding,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                multisampled: false,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                sample_type,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slot.binding + 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(sampler),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("texture_bind_group_layout"),
                    entries: &entries,
                })
        });

        // Group order matches UNIFORM_GROUP and TEXTURE_GROUP.
        let mut bind_group_layouts = vec![&uniform_layout];
        bind_group_layouts.extend(texture_layout.as_ref());
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &bind_group_layouts,
                immediate_size: 0,
            });

        let id = self.programs.insert(GpuProgram {
            label: desc.label.to_owned(),
            vertex,
            vertex_entry: desc.vertex_entry.to_owned(),
            fragment,
            fragment_entry: desc.fragment_entry.to_owned(),
            uniform_layout,
            texture_layout,
            pipeline_layout,
            textures: desc.textures.to_vec(),
            uniform_data: vec![0; desc.uniform_block_size as usize],
            texture_units: HashMap::new(),
        });
        Ok(id)
    }

    fn validate_program(&mut self, program: ProgramId) -> Result<(), String> {
        let Some(program) = self.programs.get(program) else {
            return Err("unknown program".to_owned());
        };
        let limits = self.device.limits();
        let block = program.uniform_data.len() as u64;
        if block > limits.max_uniform_buffer_binding_size as u64 {
            return Err(format!(
                "uniform block of {block} bytes exceeds the device limit of {}",
                limits.max_uniform_buffer_binding_size
            ));
        }
        if program.textures.len() as u64 > limits.max_sampled_textures_per_shader_stage as u64 {
            return Err(format!(
                "{} textures exceed the device limit of {}",
                program.textures.len(),
                limits.max_sampled_textures_per_shader_stage
            ));
        }
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
        self.pipelines.retain(|key, _| key.program != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.program.and_then(|p| self.programs.get_mut(p)) else {
            log::warn!("set_uniform without an active program");
            return;
        };
        match (location, value) {
            (UniformLocation::Texture { binding }, UniformValue::Int(unit)) => {
                program.texture_units.insert(binding, unit.max(0) as u32);
            }
            (UniformLocation::Block { offset, .. }, value) => {
                let bytes = value.to_bytes();
                let start = offset as usize;
                match program.uniform_data.get_mut(start..start + bytes.len()) {
                    Some(slot) => slot.copy_from_slice(&bytes),
                    None => log::warn!("uniform write past the end of `{}`", program.label),
                }
            }
            (UniformLocation::Texture { .. }, other) => {
                log::warn!("texture uniforms take a unit index, got {other:?}")
            }
        }
    }

    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferId {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vertex Buffer"),
                contents: data,
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.buffers.insert(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer) {
            buffer.destroy();
        }
        if self.vertex_buffer == Some(buffer) {
            self.vertex_buffer = None;
            self.attributes.clear();
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId) {
        self.vertex_buffer = Some(buffer);
        self.attributes.clear();
    }

    fn vertex_attribute(&mut self, attribute: VertexAttribute) {
        self.attributes.retain(|a| a.location != attribute.location);
        self.attributes.push(attribute);
        self.attributes.sort_by_key(|a| a.location);
    }

    fn create_texture(&mut self, image: &RgbaImage) -> TextureId {
        let texture = Texture::from_image(&self.device, &self.queue, image, Some("texture"));
        self.textures.insert(texture)
    }

    /// Sizes the device cannot allocate get a 1×1 stand-in, and
    /// `framebuffer_status` reports the attachment incomplete.
    fn create_depth_texture(&mut self, size: u32) -> TextureId {
        let limit = self.device.limits().max_texture_dimension_2d;
        let texture = if size == 0 || size > limit {
            log::warn!("depth texture of {size}px is outside 1..={limit}px");
            Texture::create_depth_texture(&self.device, [1, 1], "shadow map placeholder")
        } else {
            Texture::create_depth_texture(&self.device, [size, size], "shadow map")
        };
        let id = self.textures.insert(texture);
        self.depth_sizes.insert(id, size);
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(texture) {
            texture.texture.destroy();
        }
        self.depth_sizes.remove(texture);
        self.texture_units.retain(|_, bound| *bound != texture);
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.texture_units.insert(unit, texture);
    }

    fn create_depth_framebuffer(&mut self, depth: TextureId) -> FramebufferId {
        self.framebuffers.insert(depth)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(depth) = self.framebuffers.get(framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_owned());
        };
        match (self.textures.get(*depth), self.depth_sizes.get(*depth)) {
            (Some(_), Some(size)) => FramebufferStatus::of_depth_attachment(
                *size,
                self.device.limits().max_texture_dimension_2d,
            ),
            (Some(t), None) => FramebufferStatus::Incomplete(format!(
                "attachment has format {:?}, not a depth format",
                t.texture.format()
            )),
            (None, _) => FramebufferStatus::Incomplete("depth attachment was deleted".to_owned()),
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.framebuffer = framebuffer;
        self.passes.bind(framebuffer);
    }

    fn clear(&mut self, mask: ClearMask) {
        self.passes.clear(self.framebuffer, mask);
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn cull_face(&mut self, face: Face) {
        self.cull = face;
    }

    fn draw_triangles(&mut self, first: u32, count: u32) {
        let (Some(program_id), Some(vertex_buffer)) = (self.program, self.vertex_buffer) else {
            log::warn!("draw without a program or vertex buffer");
            return;
        };
        let Some(program) = self.programs.get(program_id) else {
            log::warn!("draw with a deleted program");
            return;
        };
        let textures = match resolve_textures(
            &program.textures,
            &program.texture_units,
            &self.texture_units,
        ) {
            Ok(textures) => textures,
            Err(e) => {
                log::warn!("{e}");
                return;
            }
        };
        let draw = RecordedDraw {
            program: program_id,
            cull: self.cull,
            viewport: self.viewport,
            vertex_buffer,
            attributes: self.attributes.clone(),
            uniform_data: program.uniform_data.clone(),
            textures,
            first,
            count,
        };
        self.passes.draw(self.framebuffer, draw);
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        let passes = self.passes.take();
        if self.is_lost() {
            return Err(RenderError::ContextLost);
        }
        if passes.is_empty() {
            return Ok(());
        }

        let mut frame = None;
        let screen_view = if passes.iter().any(|p| p.framebuffer.is_none()) {
            match &self.output {
                Output::Surface(surface) => match self.acquire(surface)? {
                    Some(surface_texture) => {
                        let view = surface_texture
                            .texture
                            .create_view(&wgpu::TextureViewDescriptor::default());
                        frame = Some(surface_texture);
                        Some(view)
                    }
                    None => return Ok(()),
                },
                Output::Offscreen(target) => Some(target.view.clone()),
            }
        } else {
            None
        };

        for pass in &passes {
            let target = if pass.framebuffer.is_some() {
                Target::Depth
            } else {
                Target::Screen
            };
            for draw in &pass.draws {
                self.ensure_pipeline(&PipelineKey {
                    program: draw.program,
                    target,
                    cull: draw.cull,
                    attributes: draw.attributes.clone(),
                });
            }
        }

        let alignment = self.device.limits().min_uniform_buffer_offset_alignment as u64;
        let (uniform_bytes, offsets) = pack_uniforms(
            passes
                .iter()
                .flat_map(|p| &p.draws)
                .map(|d| d.uniform_data.as_slice()),
            alignment,
        );
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Uniform Buffer"),
                contents: &uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut uniform_groups: HashMap<ProgramId, wgpu::BindGroup> = HashMap::new();
        let mut texture_groups: Vec<Option<wgpu::BindGroup>> = Vec::new();
        for draw in passes.iter().flat_map(|p| &p.draws) {
            let Some(program) = self.programs.get(draw.program) else {
                texture_groups.push(None);
                continue;
            };
            uniform_groups.entry(draw.program).or_insert_with(|| {
                let entries: Vec<wgpu::BindGroupEntry> =
                    wgpu::BufferSize::new(program.uniform_data.len() as u64)
                        .map(|size| wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &uniform_buffer,
                                offset: 0,
                                size: Some(size),
                            }),
                        })
                        .into_iter()
                        .collect();
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("uniform_bind_group"),
                    layout: &program.uniform_layout,
                    entries: &entries,
                })
            });

            let group = program.texture_layout.as_ref().and_then(|layout| {
                let mut entries = Vec::with_capacity(program.textures.len() * 2);
                for (slot, texture) in program.textures.iter().zip(&draw.textures) {
                    let texture = self.textures.get(*texture)?;
                    let sampler = if slot.depth {
                        &self.depth_sampler
                    } else {
                        &self.color_sampler
                    };
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot.binding,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: slot.binding + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("texture_bind_group"),
                    layout,
                    entries: &entries,
                }))
            });
            texture_groups.push(group);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        let mut index = 0;
        for pass in &passes {
            let depth_ops = wgpu::Operations {
                load: if pass.clear.depth {
                    wgpu::LoadOp::Clear(1.0)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            };
            let (target, color_view, depth_view) = match pass.framebuffer {
                None => (Target::Screen, screen_view.as_ref(), Some(&self.screen_depth.view)),
                Some(fb) => (
                    Target::Depth,
                    None,
                    self.framebuffers
                        .get(fb)
                        .and_then(|depth| self.textures.get(*depth))
                        .map(|t| &t.view),
                ),
            };
            let Some(depth_view) = depth_view else {
                log::warn!("skipping pass into a deleted framebuffer");
                index += pass.draws.len();
                continue;
            };
            let Some(target_size) = self.target_size(pass.framebuffer) else {
                index += pass.draws.len();
                continue;
            };
            let color_attachments = [color_view.map(|view| wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if pass.clear.color {
                        wgpu::LoadOp::Clear(self.clear_color)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })];

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(match target {
                    Target::Screen => "Lit Pass",
                    Target::Depth => "Depth Pass",
                }),
                color_attachments: match target {
                    Target::Screen => &color_attachments[..],
                    Target::Depth => &[],
                },
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(depth_ops),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for draw in &pass.draws {
                let draw_index = index;
                index += 1;
                let key = PipelineKey {
                    program: draw.program,
                    target,
                    cull: draw.cull,
                    attributes: draw.attributes.clone(),
                };
                let (Some(pipeline), Some(uniforms), Some(vertex_buffer)) = (
                    self.pipelines.get(&key),
                    uniform_groups.get(&draw.program),
                    self.buffers.get(draw.vertex_buffer),
                ) else {
                    log::warn!("skipping draw with deleted resources");
                    continue;
                };
                let Some(program) = self.programs.get(draw.program) else {
                    continue;
                };
                let textures = &texture_groups[draw_index];
                if program.texture_layout.is_some() && textures.is_none() {
                    log::warn!("skipping draw with a deleted texture");
                    continue;
                }
                let dynamic_offsets: &[u32] = if program.uniform_data.is_empty() {
                    &[]
                } else {
                    &offsets[draw_index..=draw_index]
                };

                let width = draw.viewport.0.min(target_size.0).max(1);
                let height = draw.viewport.1.min(target_size.1).max(1);
                render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(UNIFORM_GROUP, uniforms, dynamic_offsets);
                if let Some(textures) = textures {
                    render_pass.set_bind_group(TEXTURE_GROUP, textures, &[]);
                }
                render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                render_pass.draw(draw.first..draw.first + draw.count, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }

        if self.is_lost() {
            return Err(RenderError::ContextLost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framebuffer() -> FramebufferId {
        let mut framebuffers: SlotMap<FramebufferId, ()> = SlotMap::with_key();
        framebuffers.insert(())
    }

    fn textures(n: usize) -> Vec<TextureId> {
        let mut textures: SlotMap<TextureId, ()> = SlotMap::with_key();
        (0..n).map(|_| textures.insert(())).collect()
    }

    fn slot(name: &str, binding: u32, depth: bool) -> TextureSlot {
        TextureSlot {
            name: name.to_owned(),
            binding,
            depth,
        }
    }

    #[test]
    fn shadow_then_lit_frame_splits_into_two_passes() {
        let shadow = framebuffer();
        let mut log = PassLog::new();
        log.bind(Some(shadow));
        log.clear(Some(shadow), ClearMask::DEPTH);
        log.draw(Some(shadow), 1);
        log.draw(Some(shadow), 2);
        log.bind(None);
        log.clear(None, ClearMask::COLOR);
        log.clear(None, ClearMask::DEPTH);
        log.draw(None, 3);

        let passes = log.take();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].framebuffer, Some(shadow));
        assert_eq!(passes[0].clear, ClearMask::DEPTH);
        assert_eq!(passes[0].draws, vec![1, 2]);
        assert_eq!(passes[1].framebuffer, None);
        assert_eq!(passes[1].clear, ClearMask::COLOR_DEPTH);
        assert_eq!(passes[1].draws, vec![3]);
        assert!(log.take().is_empty());
    }

    #[test]
    fn clear_after_draws_starts_a_new_pass() {
        let mut log = PassLog::new();
        log.draw(None, 1);
        log.clear(None, ClearMask::COLOR);
        log.draw(None, 2);

        let passes = log.take();
        assert_eq!(passes.len(), 2);
        assert!(passes[0].clear.is_empty());
        assert_eq!(passes[0].draws, vec![1]);
        assert_eq!(passes[1].clear, ClearMask::COLOR);
        assert_eq!(passes[1].draws, vec![2]);
    }

    #[test]
    fn passes_that_neither_clear_nor_draw_are_dropped() {
        let shadow = framebuffer();
        let mut log: PassLog<u32> = PassLog::new();
        log.bind(Some(shadow));
        log.bind(None);
        log.bind(Some(shadow));
        log.clear(Some(shadow), ClearMask::DEPTH);

        let passes = log.take();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].framebuffer, Some(shadow));
    }

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(352, 64), 384);
    }

    #[test]
    fn uniform_blocks_start_at_aligned_offsets() {
        let lit = vec![1u8; 352];
        let depth = vec![2u8; 128];
        let (bytes, offsets) =
            pack_uniforms([lit.as_slice(), depth.as_slice(), lit.as_slice()], 256);

        assert_eq!(offsets, vec![0, 512, 768]);
        assert_eq!(bytes.len(), 1280);
        assert!(bytes[..352].iter().all(|b| *b == 1));
        assert!(bytes[352..512].iter().all(|b| *b == 0));
        assert!(bytes[512..640].iter().all(|b| *b == 2));
        assert!(bytes[768..1120].iter().all(|b| *b == 1));
    }

    #[test]
    fn uniform_buffer_is_never_empty() {
        let (bytes, offsets) = pack_uniforms(std::iter::empty(), 256);
        assert!(offsets.is_empty());
        assert_eq!(bytes.len(), 256);
    }

    #[test]
    fn attribute_components_pick_float_formats() {
        assert_eq!(vertex_format(1), wgpu::VertexFormat::Float32);
        assert_eq!(vertex_format(2), wgpu::VertexFormat::Float32x2);
        assert_eq!(vertex_format(3), wgpu::VertexFormat::Float32x3);
        assert_eq!(vertex_format(4), wgpu::VertexFormat::Float32x4);
    }

    #[test]
    fn texture_slots_follow_their_units() {
        let ids = textures(2);
        let slots = [slot("texture_id", 0, false), slot("shadow_map_id", 2, true)];
        let slot_units = HashMap::from([(0, 0), (2, 1)]);
        let bound = BTreeMap::from([(0, ids[0]), (1, ids[1])]);

        assert_eq!(
            resolve_textures(&slots, &slot_units, &bound),
            Ok(vec![ids[0], ids[1]])
        );
    }

    #[test]
    fn unassigned_texture_slots_read_unit_zero() {
        let ids = textures(2);
        let slots = [slot("texture_id", 0, false), slot("shadow_map_id", 2, true)];
        let bound = BTreeMap::from([(0, ids[0]), (1, ids[1])]);

        assert_eq!(
            resolve_textures(&slots, &HashMap::new(), &bound),
            Ok(vec![ids[0], ids[0]])
        );
    }

    #[test]
    fn empty_texture_unit_names_the_slot() {
        let ids = textures(1);
        let slots = [slot("texture_id", 0, false), slot("shadow_map_id", 2, true)];
        let slot_units = HashMap::from([(2, 1)]);
        let bound = BTreeMap::from([(0, ids[0])]);

        let err = resolve_textures(&slots, &slot_units, &bound).unwrap_err();
        assert!(err.contains("shadow_map_id"), "{err}");
        assert!(err.contains("unit 1"), "{err}");
    }
}
