//! Pass-through drawing
//!
//! Used whenever no preset is loaded, and to copy the pipeline source into its
//! history ring when a preset reads past source frames.

use shaderchain_preset::{FilterMode, ProgramInterface, ShaderError, TargetFormat};

use crate::backend::{DrawCall, DrawTarget, PassUniforms, ProgramFormat, RenderBackend};
use crate::pipeline::orthographic;

const PASSTHROUGH_WGSL: &str = r#"
struct Uniforms {
    MVPMatrix: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> params: Uniforms;
@group(0) @binding(1) var Texture: texture_2d<f32>;
@group(0) @binding(2) var TextureSampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(@location(0) VertexCoord: vec2<f32>, @location(1) TexCoord: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = params.MVPMatrix * vec4<f32>(VertexCoord, 0.0, 1.0);
    out.tex_coord = TexCoord;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(Texture, TextureSampler, in.tex_coord);
}
"#;

struct PassthroughProgram<B: RenderBackend> {
    program: B::Program,
    position: u32,
    tex_coord: u32,
    texture: u32,
}

impl<B: RenderBackend> PassthroughProgram<B> {
    fn compile(backend: &mut B, label: &str, filter: FilterMode, format: ProgramFormat) -> Result<Self, ShaderError> {
        let program = backend.compile_program(label, PASSTHROUGH_WGSL, filter, format)?;
        let interface: &ProgramInterface = backend.program_interface(&program);
        let location = |name: &str| interface.attributes.iter().find(|a| a.name == name).map(|a| a.location);

        let position = location("VertexCoord").unwrap_or(0);
        let tex_coord = location("TexCoord").unwrap_or(1);
        let texture = interface.textures.first().map_or(1, |t| t.binding);
        Ok(Self {
            program,
            position,
            tex_coord,
            texture,
        })
    }

    fn draw(&self, backend: &mut B, target: DrawTarget<'_, B>, source: &B::Texture, quad: [f32; 8], tex_coords: [f32; 8], uniforms: PassUniforms) {
        let call = DrawCall {
            attributes: vec![(self.position, quad), (self.tex_coord, tex_coords)],
            textures: vec![(self.texture, source.clone())],
            uniforms,
        };
        backend.draw(&self.program, target, &call);
    }
}

/// Draws a texture unchanged
pub struct PassthroughPipeline<B: RenderBackend> {
    output: PassthroughProgram<B>,
    history: Option<PassthroughProgram<B>>,
}

impl<B: RenderBackend> PassthroughPipeline<B> {
    /// Compiles the program that draws to the host output
    pub fn new(backend: &mut B) -> Result<Self, ShaderError> {
        Ok(Self {
            output: PassthroughProgram::compile(backend, "passthrough", FilterMode::Linear, ProgramFormat::Output)?,
            history: None,
        })
    }

    /// Compiles the program that copies the source into history targets, once
    pub fn prepare_history(&mut self, backend: &mut B) -> Result<(), ShaderError> {
        if self.history.is_none() {
            self.history = Some(PassthroughProgram::compile(
                backend,
                "source history copy",
                FilterMode::Nearest,
                ProgramFormat::Target(TargetFormat::Rgba8Unorm),
            )?);
        }
        Ok(())
    }

    /// Draws `source` onto the host output with the host projection
    pub fn draw_to_output(&self, backend: &mut B, source: &B::Texture, output: &B::Output, quad: [f32; 8], tex_coords: [f32; 8], projection: [f32; 16]) {
        let size = backend.texture_size(source);
        let uniforms = PassUniforms::new(projection, size, size, size, 0);
        self.output.draw(backend, DrawTarget::Output(output), source, quad, tex_coords, uniforms);
    }

    /// Copies the `tex_coords` region of `source` over the whole of `target`
    ///
    /// Does nothing until [`PassthroughPipeline::prepare_history`] succeeded.
    pub fn copy_to_target(&self, backend: &mut B, source: &B::Texture, target: &B::Target, target_size: (u32, u32), tex_coords: [f32; 8]) {
        let Some(history) = &self.history else {
            return;
        };
        let (width, height) = (target_size.0 as f32, target_size.1 as f32);
        let quad = [0.0, 0.0, width, 0.0, 0.0, height, width, height];
        let size = backend.texture_size(source);
        let uniforms = PassUniforms::new(orthographic(width, height), target_size, size, size, 0);
        history.draw(backend, DrawTarget::Offscreen(target), source, quad, tex_coords, uniforms);
    }
}
