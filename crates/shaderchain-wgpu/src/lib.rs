//! Multi-pass shader preset pipeline on wgpu
//!
//! Applies a shader preset (an ordered list of WGSL passes with scaling rules,
//! lookup textures and temporal feedback) to a source texture every frame.
//! Hosts hold a [`PresetPipeline`] and call [`PresetPipeline::draw_texture`]
//! from their render loop; when no preset is loaded, or loading failed, the
//! source is drawn unchanged.

mod backend;
mod chain;
mod error;
mod history;
mod passthrough;
mod pipeline;
mod targets;
mod textures;
mod wgpu_backend;

#[cfg(test)]
mod testing;

pub use backend::{DrawCall, DrawTarget, PassUniforms, ProgramFormat, RenderBackend, UNIT_QUAD};
pub use chain::{MultiPassPipeline, Pass};
pub use error::{BackendError, BindingError, PipelineError, PresetError, ResourceError, ShaderError, TargetError, TargetOwner};
pub use history::HistoryRing;
pub use passthrough::PassthroughPipeline;
pub use pipeline::{IDENTITY, PresetPipeline, orthographic};
pub use targets::{PoolTarget, TargetPool, TargetSpec, compute_sizes};
pub use textures::{LookupTexture, TextureLibrary};
pub use wgpu_backend::{WgpuBackend, WgpuProgram, WgpuTexture, texture_format};

pub use shaderchain_preset as preset;
