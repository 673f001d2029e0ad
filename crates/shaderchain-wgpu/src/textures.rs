//! Lookup texture library
//!
//! Lookup textures are the static images a preset declares next to its passes
//! (color tables, masks, noise). They are decoded and uploaded once per
//! preset load and only ever read afterwards.

use shaderchain_preset::TextureReference;
use std::path::Path;
use tracing::debug;

use crate::backend::RenderBackend;
use crate::error::ResourceError;

/// A lookup texture resident on the GPU
pub struct LookupTexture<B: RenderBackend> {
    pub id: String,
    pub size: (u32, u32),
    pub texture: B::Texture,
}

/// Immutable set of lookup textures, indexed like the preset's texture list
pub struct TextureLibrary<B: RenderBackend> {
    textures: Vec<LookupTexture<B>>,
}

impl<B: RenderBackend> TextureLibrary<B> {
    /// Loads, decodes and uploads every referenced texture
    ///
    /// Fails on the first texture that cannot be read, decoded or uploaded;
    /// textures uploaded before it are dropped.
    ///
    /// # Arguments
    /// * `backend` - Backend the textures are uploaded to
    /// * `references` - Texture ids and paths from the preset
    /// * `load_file` - Reads a file given its path relative to the preset
    pub fn load(backend: &mut B, references: &[TextureReference], load_file: impl Fn(&Path) -> Result<Vec<u8>, std::io::Error>) -> Result<Self, ResourceError> {
        let mut textures = Vec::with_capacity(references.len());

        for reference in references {
            let bytes = load_file(&reference.path).map_err(|source| ResourceError::Read {
                id: reference.id.clone(),
                path: reference.path.clone(),
                source,
            })?;

            let image = image::load_from_memory(&bytes)
                .map_err(|source| ResourceError::Decode {
                    id: reference.id.clone(),
                    path: reference.path.clone(),
                    source,
                })?
                .to_rgba8();

            let texture = backend.upload_texture(&reference.id, &image).map_err(|source| ResourceError::Upload {
                id: reference.id.clone(),
                source,
            })?;

            debug!(id = %reference.id, width = image.width(), height = image.height(), "loaded lookup texture");
            textures.push(LookupTexture {
                id: reference.id.clone(),
                size: image.dimensions(),
                texture,
            });
        }

        Ok(Self { textures })
    }

    pub fn get(&self, index: usize) -> Option<&LookupTexture<B>> {
        self.textures.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&LookupTexture<B>> {
        self.textures.iter().find(|texture| texture.id == id)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
