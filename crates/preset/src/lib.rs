//! Shader preset model and pass graph resolution
//!
//! This crate holds the GPU-free half of the shader chain runtime: it parses
//! presets (YAML manifests and libretro `.glslp` files), reflects WGSL pass
//! programs with naga and resolves the names each program declares into
//! tagged input sources. The result is a [`ChainPlan`] the runtime executes
//! frame after frame without looking at names again.

mod error;
mod glslp;

pub mod plan;
pub mod preset;
pub mod reflect;

pub use error::{PresetError, ShaderError};
pub use plan::{BindingError, BindingResolver, ChainPlan, HistoryDepths, HistorySlot, InputSource, MAX_HISTORY_FRAMES, PassPlan};
pub use preset::{AxisScale, FilterMode, PassDescriptor, PassScale, Preset, ScaleFactor, ScaleType, TargetFormat, TextureReference};
pub use reflect::{ProgramInterface, reflect_wgsl};
