//! The scene: resources, models, camera and light, and the per-frame render.
//!
//! A [`Scene`] owns the two shader programs and the shadow map, and hands out
//! generational handles for the meshes, textures and models created through
//! it. Handles remember which scene issued them; passing one to another
//! scene is rejected.

use std::sync::atomic::{AtomicU32, Ordering};

use cgmath::{Point3, Rad};
use image::RgbaImage;
use slotmap::SlotMap;

use crate::{
    camera::{Camera, Light, Projection},
    config::SceneConfig,
    context::{BufferId, Capability, GraphicsContext, TextureId, wgpu_backend::WgpuContext},
    data_structures::{
        instance::Instance,
        model::{FLOATS_PER_TRIANGLE, FLOATS_PER_VERTEX, ModelData},
    },
    error::{ConstructionError, RenderError, SceneError},
    pipelines::{depth::DepthProgram, lit::LitProgram},
    render::{self, DrawItem, FrameState, ShadowMap},
};

static NEXT_SCENE_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct SceneId(u32);

slotmap::new_key_type! {
    struct MeshKey;
    struct TextureKey;
    struct ModelKey;
}

/// Vertex buffer handle. Destroy with [`Scene::destroy_mesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Mesh {
    scene: SceneId,
    key: MeshKey,
}

/// Mipmapped image handle. Destroy with [`Scene::destroy_texture`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture {
    scene: SceneId,
    key: TextureKey,
}

/// A mesh, a texture, a shininess and a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Model {
    scene: SceneId,
    key: ModelKey,
}

#[derive(Debug)]
struct MeshData {
    buffer: BufferId,
    vertex_count: u32,
}

pub struct Scene<C: GraphicsContext = WgpuContext> {
    ctx: C,
    id: SceneId,
    config: SceneConfig,
    depth: DepthProgram,
    lit: LitProgram,
    shadow_map: ShadowMap,

    meshes: SlotMap<MeshKey, MeshData>,
    textures: SlotMap<TextureKey, TextureId>,
    models: SlotMap<ModelKey, ModelData>,
    /// Models drawn by `render`, in insertion order.
    render_set: Vec<ModelKey>,

    viewport: (u32, u32),
    camera: Camera,
    light: Light,
    projection: Projection,
    lost: bool,
}

impl<C: GraphicsContext> Scene<C> {
    pub fn new(ctx: C) -> Result<Self, ConstructionError> {
        Self::with_config(ctx, SceneConfig::default())
    }

    /// Builds both programs and the shadow map. On failure everything
    /// created so far is deleted again and no framebuffer is left bound.
    pub fn with_config(mut ctx: C, config: SceneConfig) -> Result<Self, ConstructionError> {
        if !ctx.supports(Capability::DepthTexture) {
            return Err(ConstructionError::UnsupportedCapability(
                Capability::DepthTexture,
            ));
        }

        let viewport = ctx.surface_size();
        let projection = Projection::new(
            config.fovy,
            Projection::aspect_of(viewport.0, viewport.1),
            config.near,
            config.far,
        );
        if !projection.is_valid() {
            return Err(ConstructionError::InvalidConfig(format!(
                "camera projection {projection:?}"
            )));
        }
        if !config.light_projection.is_valid() {
            return Err(ConstructionError::InvalidConfig(format!(
                "light projection {:?}",
                config.light_projection
            )));
        }

        let depth = DepthProgram::new(&mut ctx)?;
        let lit = match LitProgram::new(&mut ctx) {
            Ok(lit) => lit,
            Err(e) => {
                depth.delete(&mut ctx);
                return Err(e.into());
            }
        };
        let shadow_map = match ShadowMap::new(&mut ctx, config.shadow_map_size) {
            Ok(shadow_map) => shadow_map,
            Err(e) => {
                depth.delete(&mut ctx);
                lit.delete(&mut ctx);
                return Err(e);
            }
        };

        ctx.set_clear_color(config.clear_color);

        let light = Light {
            position: config.light_position,
            projection: config.light_projection,
        };
        let id = SceneId(NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed));
        log::info!(
            "scene {} ready: {}x{} viewport, {}px shadow map",
            id.0,
            viewport.0,
            viewport.1,
            shadow_map.size()
        );

        Ok(Self {
            ctx,
            id,
            config,
            depth,
            lit,
            shadow_map,
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            models: SlotMap::with_key(),
            render_set: Vec::new(),
            viewport,
            camera: Camera::default(),
            light,
            projection,
            lost: false,
        })
    }

    /// Uploads interleaved `(px, py, pz, nx, ny, nz, u, v)` triangle-list data.
    pub fn create_mesh(&mut self, vertex_data: &[f32]) -> Result<Mesh, SceneError> {
        if vertex_data.is_empty() || vertex_data.len() % FLOATS_PER_TRIANGLE != 0 {
            return Err(SceneError::InvalidVertexData {
                len: vertex_data.len(),
            });
        }
        let buffer = self
            .ctx
            .create_vertex_buffer(bytemuck::cast_slice(vertex_data));
        let vertex_count = (vertex_data.len() / FLOATS_PER_VERTEX) as u32;
        let key = self.meshes.insert(MeshData {
            buffer,
            vertex_count,
        });
        log::debug!("created mesh with {vertex_count} vertices");
        Ok(Mesh {
            scene: self.id,
            key,
        })
    }

    pub fn destroy_mesh(&mut self, mesh: Mesh) -> Result<(), SceneError> {
        self.owns(mesh.scene)?;
        let data = self.meshes.remove(mesh.key).ok_or(SceneError::StaleHandle)?;
        self.ctx.delete_buffer(data.buffer);
        log::debug!("destroyed mesh");
        Ok(())
    }

    pub fn create_texture(&mut self, image: &RgbaImage) -> Result<Texture, SceneError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SceneError::EmptyImage);
        }
        let texture = self.ctx.create_texture(image);
        let key = self.textures.insert(texture);
        log::debug!("created {}x{} texture", image.width(), image.height());
        Ok(Texture {
            scene: self.id,
            key,
        })
    }

    pub fn destroy_texture(&mut self, texture: Texture) -> Result<(), SceneError> {
        self.owns(texture.scene)?;
        let id = self
            .textures
            .remove(texture.key)
            .ok_or(SceneError::StaleHandle)?;
        self.ctx.delete_texture(id);
        log::debug!("destroyed texture");
        Ok(())
    }

    /// A model at the origin with identity rotation and scale 1. It is not
    /// drawn until [`Scene::add_model`] is called.
    pub fn create_model(
        &mut self,
        mesh: Mesh,
        texture: Texture,
        shininess: f32,
    ) -> Result<Model, SceneError> {
        self.owns(mesh.scene)?;
        self.owns(texture.scene)?;
        if !self.meshes.contains_key(mesh.key) || !self.textures.contains_key(texture.key) {
            return Err(SceneError::StaleHandle);
        }
        validate_shininess(shininess)?;
        let key = self.models.insert(ModelData {
            mesh,
            texture,
            shininess,
            instance: Instance::new(),
        });
        Ok(Model {
            scene: self.id,
            key,
        })
    }

    /// Adds the model to the render set. Adding it twice has no effect.
    pub fn add_model(&mut self, model: Model) -> Result<(), SceneError> {
        self.model(model)?;
        if !self.render_set.contains(&model.key) {
            self.render_set.push(model.key);
        }
        Ok(())
    }

    /// Drops the model from the render set. Its mesh and texture stay alive.
    pub fn remove_model(&mut self, model: Model) -> Result<(), SceneError> {
        self.model(model)?;
        self.render_set.retain(|key| *key != model.key);
        Ok(())
    }

    /// Removes the model from the render set and forgets it.
    pub fn destroy_model(&mut self, model: Model) -> Result<(), SceneError> {
        self.owns(model.scene)?;
        self.models
            .remove(model.key)
            .ok_or(SceneError::StaleHandle)?;
        self.render_set.retain(|key| *key != model.key);
        Ok(())
    }

    pub fn model(&self, model: Model) -> Result<&ModelData, SceneError> {
        self.owns(model.scene)?;
        self.models.get(model.key).ok_or(SceneError::StaleHandle)
    }

    /// Mutable access to the model's transform.
    pub fn model_mut(&mut self, model: Model) -> Result<&mut ModelData, SceneError> {
        self.owns(model.scene)?;
        self.models.get_mut(model.key).ok_or(SceneError::StaleHandle)
    }

    pub fn set_shininess(&mut self, model: Model, shininess: f32) -> Result<(), SceneError> {
        validate_shininess(shininess)?;
        self.model_mut(model)?.shininess = shininess;
        Ok(())
    }

    /// Models in the render set, in the order they are drawn.
    pub fn models(&self) -> impl Iterator<Item = Model> + '_ {
        self.render_set.iter().map(|key| Model {
            scene: self.id,
            key: *key,
        })
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.ctx.resize_surface(width, height);
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_camera<P: Into<Rad<f32>>, Y: Into<Rad<f32>>>(
        &mut self,
        position: Point3<f32>,
        pitch: P,
        yaw: Y,
    ) {
        self.camera = Camera::new(position, pitch, yaw);
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_light_position(&mut self, position: Point3<f32>) {
        self.light.position = position;
    }

    pub fn light_position(&self) -> Point3<f32> {
        self.light.position
    }

    pub fn light(&self) -> &Light {
        &self.light
    }

    /// Near and far planes come from the scene configuration. A field of
    /// view outside `(0, π)` or a non-positive aspect leaves the previous
    /// projection in place.
    pub fn set_projection<F: Into<Rad<f32>>>(&mut self, fovy: F, aspect: f32) {
        let projection = Projection::new(fovy, aspect, self.config.near, self.config.far);
        if !projection.is_valid() {
            log::warn!(
                "scene {}: ignoring projection with fovy {:?} and aspect {aspect}",
                self.id.0,
                projection.fovy
            );
            return;
        }
        self.projection = projection;
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn shadow_map_size(&self) -> u32 {
        self.shadow_map.size()
    }

    pub fn shadow_map(&self) -> &ShadowMap {
        &self.shadow_map
    }

    pub fn depth_program(&self) -> &DepthProgram {
        &self.depth
    }

    pub fn lit_program(&self) -> &LitProgram {
        &self.lit
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    /// Renders one frame: the depth pass, then the lit pass.
    ///
    /// Models whose mesh or texture was destroyed are skipped. Once the
    /// context is lost every call fails; build a new scene to recover.
    pub fn render(&mut self) -> Result<(), RenderError> {
        if self.lost || self.ctx.is_lost() {
            self.lost = true;
            return Err(RenderError::ContextLost);
        }

        let items = self.draw_items();
        let frame = FrameState {
            viewport: self.viewport,
            projection_matrix: self.projection.matrix(),
            view_matrix: self.camera.view_matrix(),
            lightspace_matrix: self.light.lightspace_matrix(),
            camera_position: self.camera.position,
            light_position: self.light.position,
        };

        render::shadow_pass(&mut self.ctx, &self.depth, &self.shadow_map, &frame, &items);
        render::lit_pass(&mut self.ctx, &self.lit, &self.shadow_map, &frame, &items);

        if let Err(e) = self.ctx.flush() {
            log::error!("scene {}: {e}", self.id.0);
            self.lost = true;
            return Err(e);
        }
        Ok(())
    }

    /// Deletes the programs and the shadow map and returns the context.
    /// Meshes and textures are the caller's to destroy beforehand.
    pub fn into_context(mut self) -> C {
        if !self.meshes.is_empty() || !self.textures.is_empty() {
            log::warn!(
                "scene {} dropped with {} meshes and {} textures still alive",
                self.id.0,
                self.meshes.len(),
                self.textures.len()
            );
        }
        self.depth.delete(&mut self.ctx);
        self.lit.delete(&mut self.ctx);
        self.shadow_map.delete(&mut self.ctx);
        self.ctx
    }

    fn draw_items(&self) -> Vec<DrawItem> {
        self.render_set
            .iter()
            .filter_map(|key| {
                let model = self.models.get(*key)?;
                let (Some(mesh), Some(texture)) = (
                    self.meshes.get(model.mesh.key),
                    self.textures.get(model.texture.key),
                ) else {
                    log::debug!("skipping model whose mesh or texture was destroyed");
                    return None;
                };
                Some(DrawItem {
                    buffer: mesh.buffer,
                    vertex_count: mesh.vertex_count,
                    texture: *texture,
                    shininess: model.shininess,
                    model_matrix: model.instance.model_matrix(),
                    normal_matrix: model.instance.normal_matrix(),
                })
            })
            .collect()
    }

    fn owns(&self, scene: SceneId) -> Result<(), SceneError> {
        if scene == self.id {
            Ok(())
        } else {
            log::warn!("scene {} got a handle from scene {}", self.id.0, scene.0);
            Err(SceneError::ForeignHandle)
        }
    }
}

fn validate_shininess(shininess: f32) -> Result<(), SceneError> {
    if shininess.is_finite() && shininess > 0.0 {
        Ok(())
    } else {
        Err(SceneError::InvalidShininess(shininess))
    }
}
