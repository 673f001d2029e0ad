use std::path::PathBuf;

pub use shaderchain_preset::{BindingError, PresetError, ShaderError};

/// A failure reported by the render backend itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Errors raised while loading lookup textures
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to read lookup texture `{id}` from {path:?}: {source}")]
    Read {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode lookup texture `{id}` from {path:?}: {source}")]
    Decode {
        id: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to upload lookup texture `{id}`: {source}")]
    Upload {
        id: String,
        #[source]
        source: BackendError,
    },
}

/// Where a render target belongs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOwner {
    Pass(usize),
    /// History copies of the pipeline source
    Original,
}

impl std::fmt::Display for TargetOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOwner::Pass(index) => write!(f, "pass {index}"),
            TargetOwner::Original => write!(f, "source history"),
        }
    }
}

/// Errors raised while sizing or allocating render targets
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("{owner} needs a {width}x{height} target, above the device limit of {max}")]
    TooLarge { owner: TargetOwner, width: u32, height: u32, max: u32 },
    #[error("failed to allocate a target for {owner}: {source}")]
    Allocation {
        owner: TargetOwner,
        #[source]
        source: BackendError,
    },
}

/// Errors raised while opening a preset or resizing its targets
///
/// Any of these leaves the pipeline closed; the host keeps drawing through
/// the pass-through program.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to parse preset: {0}")]
    PresetParse(#[from] PresetError),
    #[error("failed to compile pass {pass}: {source}")]
    ShaderCompile {
        pass: usize,
        #[source]
        source: ShaderError,
    },
    #[error("failed to compile the pass-through program: {0}")]
    PassthroughCompile(#[source] ShaderError),
    #[error(transparent)]
    ResourceLoad(#[from] ResourceError),
    #[error("failed to resolve bindings: {0}")]
    BindingResolution(#[from] BindingError),
    #[error("failed to allocate render targets: {0}")]
    TargetAllocation(#[from] TargetError),
}
