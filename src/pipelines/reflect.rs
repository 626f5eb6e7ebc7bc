//! Compile and link checks for WGSL stage sources.
//!
//! Each stage is parsed and validated on its own with naga ("compile"). Two
//! compiled stages are then matched against each other ("link"): the
//! fragment inputs must be produced by the vertex stage, and both stages
//! must agree on the uniform block and texture bindings they share. The
//! reflected interface is what uniform and attribute locations resolve
//! against.

use std::collections::{BTreeMap, HashMap};

use naga::{AddressSpace, Binding, ImageClass, ScalarKind, TypeInner, VectorSize};

use crate::{
    context::{TextureSlot, UniformLocation, UniformType},
    error::{ShaderError, ShaderStage},
};

/// Bind group holding the uniform block.
pub const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and their samplers.
pub const TEXTURE_GROUP: u32 = 1;

/// Scalar kind and component count of one stage input or output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoType {
    pub kind: ScalarKind,
    pub components: u32,
}

/// A parsed, validated single-stage module.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: ShaderStage,
    pub entry: String,
    module: naga::Module,
}

impl CompiledStage {
    pub fn module(&self) -> &naga::Module {
        &self.module
    }
}

/// What a linked pair of stages exposes to the rest of the crate.
#[derive(Clone, Debug, Default)]
pub struct Interface {
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Vertex inputs by name.
    pub attributes: HashMap<String, u32>,
    pub uniforms: HashMap<String, UniformLocation>,
    pub uniform_block_size: u32,
    pub textures: Vec<TextureSlot>,
}

/// Parses and validates one stage. The module must declare an entry point
/// of the matching stage.
pub fn compile(stage: ShaderStage, source: &str) -> Result<CompiledStage, ShaderError> {
    let compile_error = |log: String| ShaderError::Compile {
        stage,
        source_text: source.to_owned(),
        log,
    };

    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| compile_error(e.emit_to_string(source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|e| compile_error(error_chain(&e)))?;

    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == wanted)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| compile_error(format!("no @{stage} entry point")))?;

    Ok(CompiledStage {
        stage,
        entry,
        module,
    })
}

/// Matches a vertex and a fragment stage and reflects the combined interface.
///
/// The returned error is the link log; the caller attaches the program label.
pub fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<Interface, String> {
    let mut log = Vec::new();

    let produced = stage_io(&vertex.module, &vertex.entry, Direction::Output);
    let consumed = stage_io(&fragment.module, &fragment.entry, Direction::Input);
    for (location, (name, wanted)) in &consumed {
        match produced.get(location) {
            None => log.push(format!(
                "fragment input `{name}` at location {location} is not written by the vertex stage"
            )),
            Some((_, written)) if written != wanted => log.push(format!(
                "fragment input `{name}` at location {location} is {wanted:?} but the vertex stage writes {written:?}"
            )),
            Some(_) => {}
        }
    }

    let vertex_block = uniform_block(&vertex.module, &mut log);
    let fragment_block = uniform_block(&fragment.module, &mut log);
    let mut uniforms = HashMap::new();
    let mut uniform_block_size = 0;
    for block in [&vertex_block, &fragment_block].into_iter().flatten() {
        uniform_block_size = uniform_block_size.max(block.size);
        for (name, location) in &block.members {
            match uniforms.get(name) {
                Some(existing) if existing != location => log.push(format!(
                    "uniform `{name}` is declared differently in the vertex and fragment stages"
                )),
                Some(_) => {}
                None => {
                    uniforms.insert(name.clone(), *location);
                }
            }
        }
    }

    let mut textures: BTreeMap<u32, TextureSlot> = BTreeMap::new();
    for slot in texture_slots(&vertex.module, &mut log)
        .into_iter()
        .chain(texture_slots(&fragment.module, &mut log))
    {
        match textures.get(&slot.binding) {
            Some(existing) if *existing != slot => log.push(format!(
                "texture binding {} is declared differently in the vertex and fragment stages",
                slot.binding
            )),
            Some(_) => {}
            None => {
                textures.insert(slot.binding, slot);
            }
        }
    }
    for slot in textures.values() {
        uniforms.insert(
            slot.name.clone(),
            UniformLocation::Texture {
                binding: slot.binding,
            },
        );
    }

    if !log.is_empty() {
        return Err(log.join("\n"));
    }

    let attributes = stage_io(&vertex.module, &vertex.entry, Direction::Input)
        .into_iter()
        .map(|(location, (name, _))| (name, location))
        .collect();

    Ok(Interface {
        vertex_entry: vertex.entry.clone(),
        fragment_entry: fragment.entry.clone(),
        attributes,
        uniforms,
        uniform_block_size,
        textures: textures.into_values().collect(),
    })
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut log = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        log.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    log
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// User-defined `@location` inputs or outputs of an entry point, by location.
fn stage_io(module: &naga::Module, entry: &str, direction: Direction) -> BTreeMap<u32, (String, IoType)> {
    let mut io = BTreeMap::new();
    let Some(ep) = module.entry_points.iter().find(|ep| ep.name == entry) else {
        return io;
    };
    match direction {
        Direction::Input => {
            for arg in &ep.function.arguments {
                collect_io(module, arg.name.as_deref(), arg.ty, arg.binding.as_ref(), &mut io);
            }
        }
        Direction::Output => {
            if let Some(result) = &ep.function.result {
                collect_io(module, None, result.ty, result.binding.as_ref(), &mut io);
            }
        }
    }
    io
}

fn collect_io(
    module: &naga::Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    io: &mut BTreeMap<u32, (String, IoType)>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            if let Some(io_type) = io_type(&module.types[ty].inner) {
                let name = name.unwrap_or_default().to_owned();
                io.insert(*location, (name, io_type));
            }
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_io(module, member.name.as_deref(), member.ty, member.binding.as_ref(), io);
                }
            }
        }
    }
}

fn io_type(inner: &TypeInner) -> Option<IoType> {
    match inner {
        TypeInner::Scalar(scalar) => Some(IoType {
            kind: scalar.kind,
            components: 1,
        }),
        TypeInner::Vector { size, scalar } => Some(IoType {
            kind: scalar.kind,
            components: vector_len(*size),
        }),
        _ => None,
    }
}

fn vector_len(size: VectorSize) -> u32 {
    match size {
        VectorSize::Bi => 2,
        VectorSize::Tri => 3,
        VectorSize::Quad => 4,
    }
}

fn uniform_type(inner: &TypeInner) -> Option<UniformType> {
    match inner {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float && s.width == 4 => {
            Some(UniformType::Float)
        }
        TypeInner::Scalar(s) if s.kind == ScalarKind::Sint && s.width == 4 => {
            Some(UniformType::Int)
        }
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => Some(UniformType::Vec2),
            VectorSize::Tri => Some(UniformType::Vec3),
            VectorSize::Quad => Some(UniformType::Vec4),
        },
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float => Some(UniformType::Mat4),
        _ => None,
    }
}

struct UniformBlock {
    size: u32,
    members: Vec<(String, UniformLocation)>,
}

fn uniform_block(module: &naga::Module, log: &mut Vec<String>) -> Option<UniformBlock> {
    let mut block = None;
    for (_, global) in module.global_variables.iter() {
        if global.space != AddressSpace::Uniform {
            continue;
        }
        let name = global.name.as_deref().unwrap_or("<unnamed>");
        match &global.binding {
            Some(rb) if rb.group == UNIFORM_GROUP && rb.binding == 0 => {}
            _ => {
                log.push(format!(
                    "uniform buffer `{name}` must be bound at @group({UNIFORM_GROUP}) @binding(0)"
                ));
                continue;
            }
        }
        let TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
            log.push(format!("uniform buffer `{name}` must be a struct"));
            continue;
        };
        let members = members
            .iter()
            .filter_map(|member| {
                let ty = uniform_type(&module.types[member.ty].inner)?;
                let name = member.name.clone()?;
                Some((
                    name,
                    UniformLocation::Block {
                        offset: member.offset,
                        ty,
                    },
                ))
            })
            .collect();
        block = Some(UniformBlock {
            size: *span,
            members,
        });
    }
    block
}

fn texture_slots(module: &naga::Module, log: &mut Vec<String>) -> Vec<TextureSlot> {
    let samplers: Vec<u32> = module
        .global_variables
        .iter()
        .filter(|(_, g)| matches!(module.types[g.ty].inner, TypeInner::Sampler { .. }))
        .filter_map(|(_, g)| g.binding.as_ref())
        .filter(|rb| rb.group == TEXTURE_GROUP)
        .map(|rb| rb.binding)
        .collect();

    let mut slots = Vec::new();
    for (_, global) in module.global_variables.iter() {
        let TypeInner::Image { class, .. } = &module.types[global.ty].inner else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        let Some(rb) = global.binding.as_ref().filter(|rb| rb.group == TEXTURE_GROUP) else {
            log.push(format!("texture `{name}` must live in @group({TEXTURE_GROUP})"));
            continue;
        };
        if !samplers.contains(&(rb.binding + 1)) {
            log.push(format!(
                "texture `{name}` needs its sampler at @binding({})",
                rb.binding + 1
            ));
            continue;
        }
        slots.push(TextureSlot {
            name,
            binding: rb.binding,
            depth: matches!(class, ImageClass::Depth { .. }),
        });
    }
    slots
}
