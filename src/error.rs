//! Error types.
//!
//! Construction problems (bad shaders, missing capabilities, an unusable
//! shadow framebuffer, a degenerate projection) are fatal and carry their diagnostic payload. Scene
//! input problems are reported per call. Context loss is the only failure a
//! frame can produce.

use std::fmt;

use crate::context::Capability;

/// The programmable stage a shader source belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// What kind of program input a name lookup was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationKind {
    Attribute,
    Uniform,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKind::Attribute => f.write_str("attribute"),
            LocationKind::Uniform => f.write_str("uniform"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile. Source:\n{source_text}\nLogs:\n{log}")]
    Compile {
        stage: ShaderStage,
        source_text: String,
        log: String,
    },
    #[error("shader program `{label}` failed to link. Logs:\n{log}")]
    Link { label: String, log: String },
    #[error("shader program `{label}` failed to validate. Logs:\n{log}")]
    Validate { label: String, log: String },
    #[error("couldn't find {kind} location for `{name}` in shader program `{label}`")]
    LocationNotFound {
        label: String,
        kind: LocationKind,
        name: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConstructionError {
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("the graphics context does not support {0}")]
    UnsupportedCapability(Capability),
    #[error("shadow map framebuffer is incomplete: {0}")]
    FramebufferIncomplete(String),
    #[error("invalid scene configuration: {0}")]
    InvalidConfig(String),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SceneError {
    #[error("vertex data must hold a non-zero multiple of 24 floats, got {len}")]
    InvalidVertexData { len: usize },
    #[error("texture images must have non-zero dimensions")]
    EmptyImage,
    #[error("shininess must be finite and greater than zero, got {0}")]
    InvalidShininess(f32),
    #[error("handle belongs to a different scene")]
    ForeignHandle,
    #[error("handle refers to a destroyed resource")]
    StaleHandle,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    #[error("the graphics context was lost")]
    ContextLost,
}
