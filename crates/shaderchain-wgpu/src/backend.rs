//! Render backend abstraction
//!
//! The pipeline never talks to a graphics API directly. Everything it needs
//! from the GPU side (compiling a pass program, allocating and uploading
//! textures, issuing a quad draw) goes through [`RenderBackend`], which
//! [`crate::WgpuBackend`] implements on top of wgpu.

use shaderchain_preset::reflect::UniformBlock;
use shaderchain_preset::{FilterMode, ProgramInterface, ShaderError, TargetFormat};

use crate::error::BackendError;

/// Texture coordinates covering a whole texture, in quad vertex order
pub const UNIT_QUAD: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// Color format a program renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramFormat {
    /// An intermediate target of the given format
    Target(TargetFormat),
    /// The host output surface
    Output,
}

/// Values a pass program can read from its uniform block
///
/// Members are matched by name against the reflected block, so a program
/// only needs to declare the ones it uses, in any order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    /// `MVPMatrix`, column-major
    pub mvp: [f32; 16],
    /// `OutputSize`: (width, height, 1/width, 1/height) of the pass target
    pub output_size: [f32; 4],
    /// `InputSize` / `TextureSize`: the same for the pass input
    pub input_size: [f32; 4],
    /// `OriginalSize`: the same for the pipeline source
    pub original_size: [f32; 4],
    /// `FrameCount`
    pub frame_count: u32,
    /// `FrameDirection`, always 1 (no rewind)
    pub frame_direction: i32,
    _padding: [u32; 2],
}

impl PassUniforms {
    pub fn new(mvp: [f32; 16], output_size: (u32, u32), input_size: (u32, u32), original_size: (u32, u32), frame_count: u32) -> Self {
        Self {
            mvp,
            output_size: size_vec4(output_size),
            input_size: size_vec4(input_size),
            original_size: size_vec4(original_size),
            frame_count,
            frame_direction: 1,
            _padding: [0; 2],
        }
    }

    fn member_bytes(&self, name: &str) -> Option<&[u8]> {
        Some(match name {
            "MVPMatrix" => bytemuck::bytes_of(&self.mvp),
            "OutputSize" => bytemuck::bytes_of(&self.output_size),
            "InputSize" | "TextureSize" => bytemuck::bytes_of(&self.input_size),
            "OriginalSize" => bytemuck::bytes_of(&self.original_size),
            "FrameCount" => bytemuck::bytes_of(&self.frame_count),
            "FrameDirection" => bytemuck::bytes_of(&self.frame_direction),
            _ => return None,
        })
    }

    /// Lays the known members out as the program's uniform block expects them
    ///
    /// Unknown members stay zeroed. A member declared smaller than its value
    /// (`OutputSize: vec2<f32>`) receives the leading components.
    pub fn pack(&self, block: &UniformBlock) -> Vec<u8> {
        let mut bytes = vec![0u8; block.size as usize];
        for member in &block.members {
            let Some(value) = self.member_bytes(&member.name) else {
                continue;
            };
            let start = member.offset as usize;
            let len = value.len().min(member.size as usize).min(bytes.len().saturating_sub(start));
            bytes[start..start + len].copy_from_slice(&value[..len]);
        }
        bytes
    }
}

fn size_vec4((width, height): (u32, u32)) -> [f32; 4] {
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    [width, height, 1.0 / width, 1.0 / height]
}

/// Everything one quad draw needs besides the program and the target
#[derive(Debug, Clone)]
pub struct DrawCall<T> {
    /// Per-vertex `vec2<f32>` data by attribute location, in quad vertex order
    pub attributes: Vec<(u32, [f32; 8])>,
    /// Sampled textures by binding
    pub textures: Vec<(u32, T)>,
    pub uniforms: PassUniforms,
}

/// Where a draw lands
pub enum DrawTarget<'a, B: RenderBackend + ?Sized> {
    /// An intermediate target, cleared before drawing
    Offscreen(&'a B::Target),
    /// The host surface, drawn over without clearing
    Output(&'a B::Output),
}

/// The GPU operations the pipeline is built on
///
/// Quads are drawn as 4-vertex triangle strips in the order
/// `(x0, y0), (x1, y0), (x0, y1), (x1, y1)`.
pub trait RenderBackend {
    /// A sampleable texture handle; cloning must be cheap
    type Texture: Clone;
    /// An off-screen color target
    type Target;
    /// A compiled pass program
    type Program;
    /// The host surface the last pass renders to
    type Output;

    /// Compiles WGSL source into a program
    ///
    /// # Arguments
    /// * `label` - Debug label
    /// * `source` - WGSL source with one vertex and one fragment entry point
    /// * `filter` - Filter of every sampler the program declares
    /// * `format` - Color format the program renders into
    fn compile_program(&mut self, label: &str, source: &str, filter: FilterMode, format: ProgramFormat) -> Result<Self::Program, ShaderError>;

    /// The reflected interface of a compiled program
    fn program_interface<'a>(&self, program: &'a Self::Program) -> &'a ProgramInterface;

    /// Allocates a cleared off-screen target
    fn create_target(&mut self, label: &str, width: u32, height: u32, format: TargetFormat) -> Result<Self::Target, BackendError>;

    /// A sampleable handle to what a target holds
    fn target_texture(&self, target: &Self::Target) -> Self::Texture;

    /// Uploads RGBA8 pixels into a new texture
    fn upload_texture(&mut self, label: &str, image: &image::RgbaImage) -> Result<Self::Texture, BackendError>;

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Largest width or height a target may have
    fn max_texture_dimension(&self) -> u32;

    /// Records one quad draw
    fn draw(&mut self, program: &Self::Program, target: DrawTarget<'_, Self>, call: &DrawCall<Self::Texture>);

    /// Flushes the draws recorded since the last call
    fn end_frame(&mut self);
}
