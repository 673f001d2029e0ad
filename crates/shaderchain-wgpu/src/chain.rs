//! Multi-pass chain: building from a preset and drawing one frame
//!
//! Building compiles every pass program, resolves the binding tables once and
//! sets up (but does not size) the render target pool. Drawing walks the
//! frozen tables; no name is looked at per frame.

use shaderchain_preset::{ChainPlan, HistorySlot, InputSource, PassPlan, PassScale, Preset, ProgramInterface, ShaderError};
use std::path::Path;
use tracing::debug;

use crate::backend::{DrawCall, DrawTarget, PassUniforms, ProgramFormat, RenderBackend, UNIT_QUAD};
use crate::error::{PipelineError, TargetError, TargetOwner};
use crate::passthrough::PassthroughPipeline;
use crate::pipeline::{IDENTITY, orthographic};
use crate::targets::{TargetPool, TargetSpec};
use crate::textures::TextureLibrary;

/// One pass of a loaded chain
pub struct Pass<B: RenderBackend> {
    pub program: B::Program,
    /// Frozen binding table
    pub plan: PassPlan,
    /// Quad covering the pass target; the last pass draws the host's quad instead
    pub vertex_quad: [f32; 8],
    /// Projection for `vertex_quad`, or the host projection for the last pass
    pub mvp: [f32; 16],
}

/// A loaded preset: lookup textures, passes and their render targets
pub struct MultiPassPipeline<B: RenderBackend> {
    textures: TextureLibrary<B>,
    passes: Vec<Pass<B>>,
    pool: TargetPool<B>,
    source_size: Option<(u32, u32)>,
    viewport: (u32, u32),
}

impl<B: RenderBackend> MultiPassPipeline<B> {
    /// Loads textures, compiles passes and resolves their bindings
    ///
    /// Render targets are sized by the first [`MultiPassPipeline::resize`].
    ///
    /// # Arguments
    /// * `backend` - Backend that compiles programs and owns GPU resources
    /// * `preset` - The preset to load
    /// * `load_file` - Reads a shader or image given its path relative to the preset
    pub fn build(backend: &mut B, preset: &Preset, load_file: impl Fn(&Path) -> Result<Vec<u8>, std::io::Error>) -> Result<Self, PipelineError> {
        preset.validate()?;
        let last = preset.passes.len() - 1;

        let textures = TextureLibrary::load(backend, &preset.textures, &load_file)?;

        let mut programs = Vec::with_capacity(preset.passes.len());
        for (index, pass) in preset.passes.iter().enumerate() {
            let source = load_file(&pass.shader)
                .and_then(|bytes| String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
                .map_err(|source| PipelineError::ShaderCompile {
                    pass: index,
                    source: ShaderError::Io {
                        path: pass.shader.clone(),
                        source,
                    },
                })?;

            let format = if index == last { ProgramFormat::Output } else { ProgramFormat::Target(pass.format) };
            let program = backend
                .compile_program(&format!("pass {index}"), &source, pass.filter, format)
                .map_err(|source| PipelineError::ShaderCompile { pass: index, source })?;
            programs.push(program);
        }

        let interfaces: Vec<ProgramInterface> = programs.iter().map(|program| backend.program_interface(program).clone()).collect();
        let plan = ChainPlan::build(preset, &interfaces)?;

        for pass in &plan.passes {
            for name in &pass.skipped {
                debug!(pass = pass.index, name = %name, "no source matches shader input, leaving it unbound");
            }
        }

        // Absolute sizes do not depend on the frame, reject them up front
        let max = backend.max_texture_dimension();
        for (index, pass) in preset.passes[..last].iter().enumerate() {
            let (width, height) = pass.scale.absolute_extent();
            let (width, height) = (width.unwrap_or(0), height.unwrap_or(0));
            if width > max || height > max {
                return Err(TargetError::TooLarge {
                    owner: TargetOwner::Pass(index),
                    width,
                    height,
                    max,
                }
                .into());
            }
        }

        let specs = preset.passes[..last]
            .iter()
            .enumerate()
            .map(|(index, pass)| TargetSpec {
                format: pass.format,
                slots: plan.history.depth(HistorySlot::Pass(index)) as usize + 1,
            })
            .collect();
        let original_slots = match plan.history.depth(HistorySlot::Original) {
            0 => None,
            depth => Some(depth as usize + 1),
        };
        let scales: Vec<PassScale> = preset.passes.iter().map(|pass| pass.scale).collect();
        let pool = TargetPool::new(scales, specs, original_slots);

        let passes = programs
            .into_iter()
            .zip(plan.passes)
            .map(|(program, plan)| Pass {
                program,
                plan,
                vertex_quad: UNIT_QUAD,
                mvp: IDENTITY,
            })
            .collect();

        Ok(Self {
            textures,
            passes,
            pool,
            source_size: None,
            viewport: (0, 0),
        })
    }

    pub fn passes(&self) -> &[Pass<B>] {
        &self.passes
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn textures(&self) -> &TextureLibrary<B> {
        &self.textures
    }

    pub fn pool(&self) -> &TargetPool<B> {
        &self.pool
    }

    /// Source size the targets were last sized for
    pub fn source_size(&self) -> Option<(u32, u32)> {
        self.source_size
    }

    /// Whether some pass reads past frames of the pipeline source
    pub fn needs_source_history(&self) -> bool {
        self.passes.iter().flat_map(|pass| pass.plan.sources()).any(|source| {
            matches!(
                source,
                InputSource::Prev {
                    slot: HistorySlot::Original,
                    ..
                }
            )
        })
    }

    /// Sizes the render targets and rebuilds the intermediate quads
    pub fn resize(&mut self, backend: &mut B, source_size: (u32, u32), viewport: (u32, u32)) -> Result<(), TargetError> {
        let reallocated = self.pool.resize(backend, source_size, viewport)?;
        debug!(source = ?source_size, viewport = ?viewport, reallocated, "resized shader chain");

        let last = self.passes.len() - 1;
        for (index, pass) in self.passes[..last].iter_mut().enumerate() {
            let (width, height) = self.pool.size(index).unwrap_or((1, 1));
            let (width, height) = (width as f32, height as f32);
            pass.vertex_quad = [0.0, 0.0, width, 0.0, 0.0, height, width, height];
            pass.mvp = orthographic(width, height);
        }

        self.source_size = Some(source_size);
        self.viewport = viewport;
        Ok(())
    }

    /// Sets the projection the last pass draws the host quad with
    pub fn set_projection(&mut self, projection: [f32; 16]) {
        if let Some(pass) = self.passes.last_mut() {
            pass.mvp = projection;
        }
    }

    fn resolve(&self, source: InputSource, original: &B::Texture) -> Option<B::Texture> {
        match source {
            InputSource::Texture(index) => self.textures.get(index).map(|t| t.texture.clone()),
            InputSource::Original => Some(original.clone()),
            InputSource::Pass(index) => self.pool.pass(index).map(|ring| ring.current().texture.clone()),
            InputSource::Prev {
                slot: HistorySlot::Original,
                frames,
            } => self.pool.original().map(|ring| ring.previous(frames).texture.clone()),
            InputSource::Prev {
                slot: HistorySlot::Pass(index),
                frames,
            } => self.pool.pass(index).map(|ring| ring.previous(frames).texture.clone()),
        }
    }

    /// Draws every pass of one frame and ends the frame for all history rings
    ///
    /// # Arguments
    /// * `backend` - Backend recording the draws
    /// * `passthrough` - Copies `source` into its history ring when one exists
    /// * `source` - The pipeline source of this frame
    /// * `output` - Host surface the last pass draws to
    /// * `quad` - Host quad for the last pass
    /// * `tex_coords` - Host texture coordinates of `source`
    /// * `frame_count` - Frame counter before applying per-pass cycles
    #[allow(clippy::too_many_arguments)]
    pub fn draw(&mut self, backend: &mut B, passthrough: &PassthroughPipeline<B>, source: &B::Texture, output: &B::Output, quad: [f32; 8], tex_coords: [f32; 8], frame_count: u32) {
        let original_size = backend.texture_size(source);

        if let Some(ring) = self.pool.original() {
            passthrough.copy_to_target(backend, source, &ring.current().target, original_size, tex_coords);
        }

        let last = self.passes.len() - 1;
        for (index, pass) in self.passes.iter().enumerate() {
            let input_size = match index {
                0 => original_size,
                _ => self.pool.size(index - 1).unwrap_or(original_size),
            };

            let (target, output_size, vertex_quad) = if index == last {
                (DrawTarget::Output(output), self.viewport, quad)
            } else {
                let Some(ring) = self.pool.pass(index) else {
                    continue;
                };
                (DrawTarget::Offscreen(&ring.current().target), self.pool.size(index).unwrap_or(input_size), pass.vertex_quad)
            };

            let mut attributes = Vec::with_capacity(pass.plan.tex_coords.len() + 1);
            if let Some(location) = pass.plan.position_location {
                attributes.push((location, vertex_quad));
            }
            // Only the host source may be a sub-rectangle; every target is sampled whole
            attributes.extend(pass.plan.tex_coords.iter().map(|binding| match binding.source {
                InputSource::Original => (binding.location, tex_coords),
                _ => (binding.location, UNIT_QUAD),
            }));

            let textures = pass
                .plan
                .samplers
                .iter()
                .filter_map(|binding| self.resolve(binding.source, source).map(|texture| (binding.unit, texture)))
                .collect();

            let frame_count = match (pass.plan.has_frame_count, pass.plan.frame_count_mod) {
                (false, _) => 0,
                (true, Some(cycle)) => frame_count % cycle,
                (true, None) => frame_count,
            };

            let call = DrawCall {
                attributes,
                textures,
                uniforms: PassUniforms::new(pass.mvp, output_size, input_size, original_size, frame_count),
            };
            backend.draw(&pass.program, target, &call);
        }

        self.pool.advance();
    }
}
