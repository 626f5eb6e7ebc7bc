//! Shader programs.
//!
//! [`ShaderProgram`] is the one compiled-program type. A pass describes
//! itself with a [`ProgramSource`] (its WGSL stages plus the attribute and
//! uniform names it relies on) and wraps the program with typed setters:
//!
//! - `depth`: writes light-space depth into the shadow map
//! - `lit`: Phong shading with a shadow-map lookup
//! - `reflect`: per-stage compile and interface linking on top of naga

use std::collections::HashMap;

use cgmath::{Matrix4, Vector3};

use crate::{
    context::{
        BufferId, GraphicsContext, ProgramDesc, ProgramId, UniformLocation, UniformType,
        UniformValue, VertexAttribute,
    },
    data_structures::model::{VERTEX_FIELDS, VERTEX_STRIDE},
    error::{LocationKind, ShaderError, ShaderStage},
};

pub mod depth;
pub mod lit;
pub mod reflect;

/// Stage sources and the names a pass resolves once at construction.
#[derive(Clone, Copy, Debug)]
pub struct ProgramSource {
    pub label: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
    pub attributes: &'static [&'static str],
    pub uniforms: &'static [&'static str],
}

/// Location of a vertex input inside a linked program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeLocation(pub u32);

/// A linked and validated vertex + fragment program.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    label: String,
    attributes: HashMap<String, AttributeLocation>,
    uniforms: HashMap<String, UniformLocation>,
}

impl ShaderProgram {
    /// Compiles both stages, links them, validates the result and resolves
    /// every declared name. Any failure leaves nothing behind in `ctx`.
    pub fn new(ctx: &mut impl GraphicsContext, source: &ProgramSource) -> Result<Self, ShaderError> {
        let vertex = reflect::compile(ShaderStage::Vertex, source.vertex)?;
        let fragment = reflect::compile(ShaderStage::Fragment, source.fragment)?;

        let link_error = |log: String| ShaderError::Link {
            label: source.label.to_owned(),
            log,
        };
        let interface = reflect::link(&vertex, &fragment).map_err(link_error)?;

        let id = ctx
            .create_program(&ProgramDesc {
                label: source.label,
                vertex_source: source.vertex,
                vertex_entry: &interface.vertex_entry,
                fragment_source: source.fragment,
                fragment_entry: &interface.fragment_entry,
                uniform_block_size: interface.uniform_block_size,
                textures: &interface.textures,
            })
            .map_err(link_error)?;

        let resolved = ctx
            .validate_program(id)
            .map_err(|log| ShaderError::Validate {
                label: source.label.to_owned(),
                log,
            })
            .and_then(|()| resolve(source, &interface));

        match resolved {
            Ok((attributes, uniforms)) => {
                log::debug!("linked shader program `{}`", source.label);
                Ok(Self {
                    id,
                    label: source.label.to_owned(),
                    attributes,
                    uniforms,
                })
            }
            Err(e) => {
                ctx.delete_program(id);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Makes this program active for every following draw.
    pub fn use_program(&self, ctx: &mut impl GraphicsContext) {
        ctx.use_program(self.id);
    }

    pub fn attribute_location(&self, name: &str) -> Result<AttributeLocation, ShaderError> {
        self.attributes
            .get(name)
            .copied()
            .ok_or_else(|| self.not_found(LocationKind::Attribute, name))
    }

    pub fn uniform_location(&self, name: &str) -> Result<UniformLocation, ShaderError> {
        self.uniforms
            .get(name)
            .copied()
            .ok_or_else(|| self.not_found(LocationKind::Uniform, name))
    }

    pub fn set_matrix4(&self, ctx: &mut impl GraphicsContext, location: UniformLocation, m: &Matrix4<f32>) {
        ctx.set_uniform(location, UniformValue::Mat4((*m).into()));
    }

    pub fn set_vec3(&self, ctx: &mut impl GraphicsContext, location: UniformLocation, v: Vector3<f32>) {
        ctx.set_uniform(location, UniformValue::Vec3(v.into()));
    }

    pub fn set_float(&self, ctx: &mut impl GraphicsContext, location: UniformLocation, v: f32) {
        ctx.set_uniform(location, UniformValue::Float(v));
    }

    pub fn set_int(&self, ctx: &mut impl GraphicsContext, location: UniformLocation, v: i32) {
        ctx.set_uniform(location, UniformValue::Int(v));
    }

    /// Binds `buffer` with the fixed interleaved layout, enabling only the
    /// attributes this program declares.
    pub fn bind_vertex_layout(&self, ctx: &mut impl GraphicsContext, buffer: BufferId) {
        ctx.bind_vertex_buffer(buffer);
        for field in &VERTEX_FIELDS {
            if let Some(AttributeLocation(location)) = self.attributes.get(field.name) {
                ctx.vertex_attribute(VertexAttribute {
                    location: *location,
                    components: field.components,
                    stride: VERTEX_STRIDE,
                    offset: field.offset,
                });
            }
        }
    }

    pub fn delete(self, ctx: &mut impl GraphicsContext) {
        log::debug!("deleting shader program `{}`", self.label);
        ctx.delete_program(self.id);
    }

    fn not_found(&self, kind: LocationKind, name: &str) -> ShaderError {
        ShaderError::LocationNotFound {
            label: self.label.clone(),
            kind,
            name: name.to_owned(),
        }
    }
}

type Resolved = (
    HashMap<String, AttributeLocation>,
    HashMap<String, UniformLocation>,
);

/// Keeps only the declared names; a declared name the program lacks is an error.
fn resolve(source: &ProgramSource, interface: &reflect::Interface) -> Result<Resolved, ShaderError> {
    let missing = |kind, name: &str| ShaderError::LocationNotFound {
        label: source.label.to_owned(),
        kind,
        name: name.to_owned(),
    };

    let mut attributes = HashMap::new();
    for name in source.attributes {
        let location = interface
            .attributes
            .get(*name)
            .ok_or_else(|| missing(LocationKind::Attribute, name))?;
        attributes.insert((*name).to_owned(), AttributeLocation(*location));
    }

    let mut uniforms = HashMap::new();
    for name in source.uniforms {
        let location = interface
            .uniforms
            .get(*name)
            .ok_or_else(|| missing(LocationKind::Uniform, name))?;
        uniforms.insert((*name).to_owned(), *location);
    }

    Ok((attributes, uniforms))
}

/// Checks a resolved block location carries the type a setter writes.
pub(crate) fn expect_type(
    program: &ShaderProgram,
    name: &str,
    location: UniformLocation,
    ty: UniformType,
) -> Result<UniformLocation, ShaderError> {
    match location {
        UniformLocation::Block { ty: found, .. } if found == ty => Ok(location),
        UniformLocation::Texture { .. } if ty == UniformType::Int => Ok(location),
        _ => Err(ShaderError::Link {
            label: program.label.clone(),
            log: format!("uniform `{name}` is not a {ty:?}"),
        }),
    }
}
