use std::path::PathBuf;

use crate::preset::ScaleFactorParseError;

/// Errors raised while reading or parsing a preset
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("failed to read preset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML preset: {0}")]
    Yaml(#[from] serde_norway::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("missing key `{0}`")]
    MissingKey(String),
    #[error("invalid value {value:?} for `{key}`")]
    InvalidValue { key: String, value: String },
    #[error("invalid scale factor for `{key}`: {source}")]
    InvalidScaleFactor {
        key: String,
        #[source]
        source: ScaleFactorParseError,
    },
    #[error("preset has no passes")]
    NoPasses,
    #[error("lookup texture `{0}` declared twice")]
    DuplicateTexture(String),
    #[error("alias `{0}` is empty, duplicated or shadows a lookup texture")]
    DuplicateAlias(String),
}

/// Errors raised while reading, reflecting or compiling a pass shader
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("failed to read shader {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("WGSL parse error:\n{0}")]
    Parse(String),
    #[error("WGSL validation error:\n{0}")]
    Validation(String),
    #[error("no {0} entry point")]
    MissingEntryPoint(&'static str),
    #[error("`{name}` is bound in group {group}; pass resources must live in group 0")]
    UnsupportedBindGroup { name: String, group: u32 },
    #[error("more than one uniform block declared")]
    MultipleUniformBlocks,
    #[error("backend rejected the program: {0}")]
    Backend(String),
}
