//! Vertex layout and scene-side model records.
//!
//! Every mesh uses one fixed interleaved layout: position, normal and
//! texture coordinate as 32-bit floats, 32 bytes per vertex.

use crate::{
    data_structures::instance::Instance,
    scene::{Mesh, Texture},
};

pub const FLOATS_PER_VERTEX: usize = 8;
pub const VERTEX_STRIDE: u64 = (FLOATS_PER_VERTEX * std::mem::size_of::<f32>()) as u64;
/// Mesh data is a triangle list, so its length must be a multiple of this.
pub const FLOATS_PER_TRIANGLE: usize = FLOATS_PER_VERTEX * 3;

/// One attribute of the interleaved layout, named as the shaders name it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexField {
    pub name: &'static str,
    pub components: u32,
    pub offset: u64,
}

pub const VERTEX_FIELDS: [VertexField; 3] = [
    VertexField {
        name: "position",
        components: 3,
        offset: 0,
    },
    VertexField {
        name: "normal",
        components: 3,
        offset: 12,
    },
    VertexField {
        name: "texture_coord",
        components: 2,
        offset: 24,
    },
];

/// Scene-side record behind a [`crate::scene::Model`] handle.
///
/// `mesh` and `texture` are references, not ownership: destroying either
/// while the model lives leaves the model unrenderable until it is removed.
#[derive(Clone, Debug)]
pub struct ModelData {
    pub(crate) mesh: Mesh,
    pub(crate) texture: Texture,
    pub(crate) shininess: f32,
    pub instance: Instance,
}

impl ModelData {
    pub fn mesh(&self) -> Mesh {
        self.mesh
    }

    pub fn texture(&self) -> Texture {
        self.texture
    }

    pub fn shininess(&self) -> f32 {
        self.shininess
    }
}
