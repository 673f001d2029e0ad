//! WGSL program reflection
//!
//! Pass shaders declare their inputs by name: vertex attributes on the vertex
//! entry point (`VertexCoord`, `TexCoord`, `OrigTexCoord`, ...), `texture_2d`
//! globals (`Texture`, `Pass1Texture`, `LUTTexture`, ...) and one optional
//! uniform block whose member names pick the values the runtime writes
//! (`MVPMatrix`, `OutputSize`, `FrameCount`, ...).

use serde::Serialize;

use crate::error::ShaderError;

/// A vertex entry point input with a `@location`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
}

/// A `texture_2d` global
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextureBinding {
    pub name: String,
    pub binding: u32,
}

/// One member of the uniform block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformMember {
    pub name: String,
    /// Byte offset inside the block
    pub offset: u32,
    /// Byte size of the member type
    pub size: u32,
}

/// The uniform block of a pass program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformBlock {
    pub binding: u32,
    /// Size of the whole block in bytes
    pub size: u32,
    pub members: Vec<UniformMember>,
}

impl UniformBlock {
    /// Looks up a member by name
    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|member| member.name == name)
    }
}

/// Everything the pass graph needs to know about a compiled program
///
/// All bindings live in group 0. Attributes are sorted by location and
/// textures and samplers by binding, so downstream tables follow declaration
/// order of the binding slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramInterface {
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub attributes: Vec<VertexAttribute>,
    pub textures: Vec<TextureBinding>,
    /// Bindings of all sampler globals
    pub samplers: Vec<u32>,
    pub uniforms: Option<UniformBlock>,
}

impl ProgramInterface {
    /// Whether the uniform block declares a `FrameCount` member
    pub fn has_frame_count(&self) -> bool {
        self.uniforms.as_ref().is_some_and(|block| block.member("FrameCount").is_some())
    }
}

/// Parses and validates WGSL source and extracts its pass interface
///
/// # Arguments
/// * `source` - WGSL source with one vertex and one fragment entry point
///
/// # Returns
/// The reflected interface, or the parse/validation diagnostics
pub fn reflect_wgsl(source: &str) -> Result<ProgramInterface, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse(e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
    validator.validate(&module).map_err(|e| ShaderError::Validation(e.emit_to_string(source)))?;

    reflect_module(&module)
}

fn reflect_module(module: &naga::Module) -> Result<ProgramInterface, ShaderError> {
    let vertex = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Vertex)
        .ok_or(ShaderError::MissingEntryPoint("vertex"))?;
    let fragment = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Fragment)
        .ok_or(ShaderError::MissingEntryPoint("fragment"))?;

    let mut attributes = Vec::new();
    for argument in &vertex.function.arguments {
        match (&argument.binding, &module.types[argument.ty].inner) {
            (Some(naga::Binding::Location { location, .. }), _) => attributes.push(VertexAttribute {
                name: argument.name.clone().unwrap_or_default(),
                location: *location,
            }),
            // Inputs grouped in a struct carry their locations on the members
            (None, naga::TypeInner::Struct { members, .. }) => {
                attributes.extend(members.iter().filter_map(|member| match member.binding {
                    Some(naga::Binding::Location { location, .. }) => Some(VertexAttribute {
                        name: member.name.clone().unwrap_or_default(),
                        location,
                    }),
                    _ => None,
                }));
            }
            _ => {}
        }
    }
    attributes.sort_by_key(|attribute| attribute.location);

    let mut textures = Vec::new();
    let mut samplers = Vec::new();
    let mut uniforms = None;

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        if binding.group != 0 {
            return Err(ShaderError::UnsupportedBindGroup { name, group: binding.group });
        }

        match (&global.space, &module.types[global.ty].inner) {
            (_, naga::TypeInner::Image { .. }) => textures.push(TextureBinding { name, binding: binding.binding }),
            (_, naga::TypeInner::Sampler { .. }) => samplers.push(binding.binding),
            (naga::AddressSpace::Uniform, naga::TypeInner::Struct { members, span }) => {
                if uniforms.is_some() {
                    return Err(ShaderError::MultipleUniformBlocks);
                }
                let members = members
                    .iter()
                    .map(|member| UniformMember {
                        name: member.name.clone().unwrap_or_default(),
                        offset: member.offset,
                        size: module.types[member.ty].inner.size(module.to_ctx()),
                    })
                    .collect();
                uniforms = Some(UniformBlock {
                    binding: binding.binding,
                    size: *span,
                    members,
                });
            }
            _ => {}
        }
    }
    textures.sort_by_key(|texture| texture.binding);
    samplers.sort_unstable();

    Ok(ProgramInterface {
        vertex_entry: vertex.name.clone(),
        fragment_entry: fragment.name.clone(),
        attributes,
        textures,
        samplers,
        uniforms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS_SHADER: &str = r#"
struct Uniforms {
    MVPMatrix: mat4x4<f32>,
    OutputSize: vec4<f32>,
    FrameCount: u32,
}

@group(0) @binding(0) var<uniform> params: Uniforms;
@group(0) @binding(1) var s: sampler;
@group(0) @binding(3) var Pass1Texture: texture_2d<f32>;
@group(0) @binding(2) var Texture: texture_2d<f32>;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) uv_prev: vec2<f32>,
}

@vertex
fn vs_main(@location(1) TexCoord: vec2<f32>, @location(0) VertexCoord: vec2<f32>, @location(2) Pass1TexCoord: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = params.MVPMatrix * vec4<f32>(VertexCoord, 0.0, 1.0);
    out.uv = TexCoord;
    out.uv_prev = Pass1TexCoord;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let a = textureSample(Texture, s, in.uv);
    let b = textureSample(Pass1Texture, s, in.uv_prev);
    return mix(a, b, f32(params.FrameCount % 2u));
}
"#;

    #[test]
    fn test_reflects_pass_interface() {
        let interface = reflect_wgsl(PASS_SHADER).unwrap();

        assert_eq!(interface.vertex_entry, "vs_main");
        assert_eq!(interface.fragment_entry, "fs_main");

        let attributes: Vec<_> = interface.attributes.iter().map(|a| (a.name.as_str(), a.location)).collect();
        assert_eq!(attributes, [("VertexCoord", 0), ("TexCoord", 1), ("Pass1TexCoord", 2)]);

        let textures: Vec<_> = interface.textures.iter().map(|t| (t.name.as_str(), t.binding)).collect();
        assert_eq!(textures, [("Texture", 2), ("Pass1Texture", 3)]);
        assert_eq!(interface.samplers, [1]);

        let uniforms = interface.uniforms.as_ref().unwrap();
        assert_eq!(uniforms.binding, 0);
        assert_eq!(uniforms.member("OutputSize").map(|m| (m.offset, m.size)), Some((64, 16)));
        assert_eq!(uniforms.member("FrameCount").map(|m| (m.offset, m.size)), Some((80, 4)));
        assert!(interface.has_frame_count());
    }

    #[test]
    fn test_struct_vertex_inputs() {
        let source = r#"
struct VertexIn {
    @location(0) VertexCoord: vec2<f32>,
    @location(1) TexCoord: vec2<f32>,
}

@vertex
fn vs(in: VertexIn) -> @builtin(position) vec4<f32> {
    return vec4<f32>(in.VertexCoord + in.TexCoord, 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;
        let interface = reflect_wgsl(source).unwrap();
        let names: Vec<_> = interface.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["VertexCoord", "TexCoord"]);
        assert!(interface.uniforms.is_none());
        assert!(!interface.has_frame_count());
    }

    #[test]
    fn test_rejects_invalid_programs() {
        assert!(matches!(reflect_wgsl("fn broken( {"), Err(ShaderError::Parse(_))));

        let vertex_only = "@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
        assert!(matches!(reflect_wgsl(vertex_only), Err(ShaderError::MissingEntryPoint("fragment"))));

        let other_group = r#"
@group(1) @binding(0) var Texture: texture_2d<f32>;
@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }
@fragment fn fs() -> @location(0) vec4<f32> { return textureLoad(Texture, vec2<i32>(0, 0), 0); }
"#;
        assert!(matches!(reflect_wgsl(other_group), Err(ShaderError::UnsupportedBindGroup { group: 1, .. })));
    }
}
