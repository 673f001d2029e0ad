//! Shader preset pipeline for rendering hosts
//!
//! [`PresetPipeline`] is what a render loop holds on to: it owns the backend,
//! draws through the loaded preset when there is one and through a plain
//! pass-through program otherwise.

use shaderchain_preset::Preset;
use std::path::Path;
use tracing::{error, info};

use crate::backend::RenderBackend;
use crate::chain::MultiPassPipeline;
use crate::error::PipelineError;
use crate::passthrough::PassthroughPipeline;

/// Column-major identity matrix
pub const IDENTITY: [f32; 16] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];

/// Column-major projection of pixel coordinates onto clip space
///
/// (0, 0) maps to the top-left corner and (width, height) to the bottom-right
/// one, matching texture coordinates on wgpu.
pub fn orthographic(width: f32, height: f32) -> [f32; 16] {
    let (width, height) = (width.max(1.0), height.max(1.0));
    [
        2.0 / width,
        0.0,
        0.0,
        0.0,
        0.0,
        -2.0 / height,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
        0.0,
        -1.0,
        1.0,
        0.0,
        1.0,
    ]
}

/// Applies a shader preset to a source texture every frame
///
/// Loading failures never break drawing: until a preset is successfully
/// opened, and after any failure, frames go through unchanged.
pub struct PresetPipeline<B: RenderBackend> {
    backend: B,
    passthrough: PassthroughPipeline<B>,
    chain: Option<MultiPassPipeline<B>>,
    frame_count: u32,
    /// Viewport size; the source size until the host sets one
    output_size: Option<(u32, u32)>,
    projection: [f32; 16],
    output_dirty: bool,
    projection_dirty: bool,
    last_source_size: Option<(u32, u32)>,
}

impl<B: RenderBackend> PresetPipeline<B> {
    /// Creates a pipeline with no preset loaded
    ///
    /// # Arguments
    /// * `backend` - Backend all resources are created on
    pub fn new(mut backend: B) -> Result<Self, PipelineError> {
        let passthrough = PassthroughPipeline::new(&mut backend).map_err(PipelineError::PassthroughCompile)?;
        Ok(Self {
            backend,
            passthrough,
            chain: None,
            frame_count: 0,
            output_size: None,
            projection: IDENTITY,
            output_dirty: false,
            projection_dirty: false,
            last_source_size: None,
        })
    }

    /// Loads a preset file, replacing the current one
    ///
    /// YAML manifests are recognized by their `.yaml`/`.yml` extension, any
    /// other file is read as a libretro `.glslp` preset. Shaders and textures
    /// are read relative to the preset's directory.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        self.close();

        let path = path.as_ref();
        let preset = Preset::from_file(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.open_preset(&preset, move |relative: &Path| std::fs::read(base.join(relative)))
    }

    /// Loads a parsed preset, replacing the current one
    ///
    /// The new chain is built completely before it is installed; on error the
    /// pipeline is left closed.
    ///
    /// # Arguments
    /// * `preset` - The preset to load
    /// * `load_file` - Reads a shader or lookup texture given its path from the preset
    pub fn open_preset(&mut self, preset: &Preset, load_file: impl Fn(&Path) -> Result<Vec<u8>, std::io::Error>) -> Result<(), PipelineError> {
        self.close();

        let mut chain = MultiPassPipeline::build(&mut self.backend, preset, load_file)?;
        if chain.needs_source_history() {
            self.passthrough.prepare_history(&mut self.backend).map_err(PipelineError::PassthroughCompile)?;
        }
        chain.set_projection(self.projection);
        if let Some(source_size) = self.last_source_size {
            chain.resize(&mut self.backend, source_size, self.output_size.unwrap_or(source_size))?;
        }

        info!(passes = chain.pass_count(), textures = chain.textures().len(), "opened shader preset");
        self.chain = Some(chain);
        self.frame_count = 0;
        self.output_dirty = false;
        self.projection_dirty = false;
        Ok(())
    }

    /// Drops the loaded preset and all of its GPU resources
    pub fn close(&mut self) {
        if self.chain.take().is_some() {
            info!("closed shader preset");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.is_some()
    }

    /// Number of passes of the loaded preset, 0 when closed
    pub fn pass_count(&self) -> usize {
        self.chain.as_ref().map_or(0, MultiPassPipeline::pass_count)
    }

    /// Sets the viewport size; targets are resized on the next draw
    pub fn set_output_size(&mut self, width: u32, height: u32) {
        self.output_size = Some((width, height));
        self.output_dirty = true;
    }

    /// Sets the projection the host quad is drawn with
    pub fn set_projection_matrix(&mut self, projection: [f32; 16]) {
        self.projection = projection;
        self.projection_dirty = true;
    }

    /// Draws one frame of `source` onto `output`
    ///
    /// # Arguments
    /// * `source` - Texture to process
    /// * `output` - Host surface to draw on
    /// * `quad` - Corners of the destination rectangle, in `projection` space
    /// * `tex_coords` - Region of `source` to use
    pub fn draw_texture(&mut self, source: &B::Texture, output: &B::Output, quad: [f32; 8], tex_coords: [f32; 8]) {
        let source_size = self.backend.texture_size(source);
        self.last_source_size = Some(source_size);
        let viewport = self.output_size.unwrap_or(source_size);

        let resized = match &mut self.chain {
            Some(chain) if self.output_dirty || chain.source_size() != Some(source_size) => chain.resize(&mut self.backend, source_size, viewport),
            _ => Ok(()),
        };
        self.output_dirty = false;
        if let Err(e) = resized {
            error!(error = %e, "failed to resize shader preset targets, falling back to pass-through");
            self.close();
        }

        if self.projection_dirty {
            if let Some(chain) = &mut self.chain {
                chain.set_projection(self.projection);
            }
            self.projection_dirty = false;
        }

        match &mut self.chain {
            Some(chain) => {
                chain.draw(&mut self.backend, &self.passthrough, source, output, quad, tex_coords, self.frame_count);
                self.frame_count = self.frame_count.wrapping_add(1);
            }
            None => self.passthrough.draw_to_output(&mut self.backend, source, output, quad, tex_coords, self.projection),
        }

        self.backend.end_frame();
    }

    /// Frames drawn since the current preset was opened
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn chain(&self) -> Option<&MultiPassPipeline<B>> {
        self.chain.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UNIT_QUAD;
    use crate::error::{ResourceError, TargetError};
    use crate::testing::{MockOutput, RecordedDraw, RecordingBackend, png_bytes};
    use crate::backend::ProgramFormat;
    use shaderchain_preset::{FilterMode, InputSource, PassDescriptor, PassScale, ScaleFactor, ScaleType, TargetFormat, TextureReference};
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;

    const QUAD: [f32; 8] = [0.0, 0.0, 64.0, 0.0, 0.0, 48.0, 64.0, 48.0];

    /// A pass program sampling `textures` at bindings 2, 3, ...
    fn pass_shader(textures: &[&str], frame_count: bool) -> String {
        let mut wgsl = String::from("struct Uniforms {\n    MVPMatrix: mat4x4<f32>,\n");
        if frame_count {
            wgsl.push_str("    FrameCount: u32,\n");
        }
        wgsl.push_str("}\n\n@group(0) @binding(0) var<uniform> params: Uniforms;\n@group(0) @binding(1) var s: sampler;\n");
        for (index, name) in textures.iter().enumerate() {
            wgsl.push_str(&format!("@group(0) @binding({}) var {name}: texture_2d<f32>;\n", index + 2));
        }
        wgsl.push_str(
            "
@vertex
fn vs_main(@location(0) VertexCoord: vec2<f32>, @location(1) TexCoord: vec2<f32>) -> @builtin(position) vec4<f32> {
    return params.MVPMatrix * vec4<f32>(VertexCoord, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    var color = vec4<f32>(0.0);
",
        );
        for name in textures {
            wgsl.push_str(&format!("    color += textureSample({name}, s, vec2<f32>(0.5));\n"));
        }
        wgsl.push_str("    return color;\n}\n");
        wgsl
    }

    struct Fixture {
        preset: Preset,
        files: HashMap<PathBuf, Vec<u8>>,
    }

    impl Fixture {
        fn new(passes: &[&[&str]]) -> Self {
            let mut fixture = Self {
                preset: Preset {
                    passes: Vec::new(),
                    textures: Vec::new(),
                    aliases: BTreeMap::new(),
                },
                files: HashMap::new(),
            };
            for textures in passes {
                fixture.push_pass(textures, false);
            }
            fixture
        }

        fn push_pass(&mut self, textures: &[&str], frame_count: bool) -> &mut PassDescriptor {
            let path = PathBuf::from(format!("pass{}.wgsl", self.preset.passes.len()));
            self.files.insert(path.clone(), pass_shader(textures, frame_count).into_bytes());
            self.preset.passes.push(PassDescriptor::new(path));
            self.preset.passes.last_mut().unwrap()
        }

        fn open(&self, pipeline: &mut PresetPipeline<RecordingBackend>) -> Result<(), PipelineError> {
            let files = self.files.clone();
            pipeline.open_preset(&self.preset, move |path: &Path| {
                files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{path:?}")))
            })
        }
    }

    fn pipeline() -> PresetPipeline<RecordingBackend> {
        PresetPipeline::new(RecordingBackend::new()).unwrap()
    }

    /// Draws `frames` frames of a fresh 320x240 source and returns the draws of each
    fn draw_frames(pipeline: &mut PresetPipeline<RecordingBackend>, frames: usize) -> Vec<Vec<RecordedDraw>> {
        let source = pipeline.backend_mut().host_texture(320, 240);
        (0..frames)
            .map(|_| {
                let before = pipeline.backend().draws.len();
                pipeline.draw_texture(&source, &MockOutput, QUAD, UNIT_QUAD);
                pipeline.backend().draws[before..].to_vec()
            })
            .collect()
    }

    #[test]
    fn test_orthographic_maps_pixels_to_clip_space() {
        let m = orthographic(200.0, 100.0);
        let project = |x: f32, y: f32| (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13]);
        assert_eq!(project(0.0, 0.0), (-1.0, 1.0));
        assert_eq!(project(200.0, 100.0), (1.0, -1.0));
        assert_eq!(project(100.0, 50.0), (0.0, 0.0));
    }

    #[test]
    fn test_one_pass_per_descriptor_and_one_target_per_intermediate() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"], &["Texture"]]).open(&mut pipeline).unwrap();
        assert!(pipeline.is_initialized());
        assert_eq!(pipeline.pass_count(), 3);

        let frames = draw_frames(&mut pipeline, 1);
        assert_eq!(pipeline.chain().map(|chain| chain.pool().len()), Some(2));
        assert_eq!(pipeline.backend().targets.len(), 2);

        let draws = &frames[0];
        assert_eq!(draws.len(), 3);
        assert!(draws[0].target.is_some() && draws[1].target.is_some());
        assert_eq!(draws[2].target, None);
        assert_eq!(draws[1].texture(2), draws[0].target);
        assert_eq!(draws[2].texture(2), draws[1].target);
        assert_eq!(pipeline.backend().frames, 1);
    }

    #[test]
    fn test_pass_references_read_the_same_frame() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"], &["Pass0Texture", "Pass1Texture"]]).open(&mut pipeline).unwrap();

        for draws in draw_frames(&mut pipeline, 2) {
            assert_eq!(draws[2].texture(2), draws[0].target);
            assert_eq!(draws[2].texture(3), draws[1].target);
        }
    }

    #[test]
    fn test_sampler_order_follows_bindings() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"], &["Pass1Texture", "Pass0Texture", "OrigTexture"]]).open(&mut pipeline).unwrap();

        let plan = &pipeline.chain().unwrap().passes()[2].plan;
        let samplers: Vec<_> = plan.samplers.iter().map(|binding| (binding.unit, binding.source)).collect();
        assert_eq!(samplers, [(2, InputSource::Pass(1)), (3, InputSource::Pass(0)), (4, InputSource::Original)]);
    }

    #[test]
    fn test_single_pass_draws_source_with_host_quad() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"]]).open(&mut pipeline).unwrap();
        pipeline.set_output_size(640, 480);
        let source = pipeline.backend_mut().host_texture(320, 240);
        let tex_coords = [0.25, 0.25, 0.75, 0.25, 0.25, 0.75, 0.75, 0.75];

        pipeline.draw_texture(&source, &MockOutput, QUAD, tex_coords);

        let backend = pipeline.backend();
        assert!(backend.targets.is_empty());
        assert_eq!(backend.draws.len(), 1);
        let draw = &backend.draws[0];
        assert_eq!(draw.program, "pass 0");
        assert_eq!(draw.target, None);
        assert_eq!(draw.texture(2), Some(source.id));
        assert_eq!(draw.attribute(0), Some(QUAD));
        assert_eq!(draw.attribute(1), Some(tex_coords));
        assert_eq!(draw.call.uniforms.output_size, [640.0, 480.0, 1.0 / 640.0, 1.0 / 480.0]);
        assert_eq!(draw.call.uniforms.original_size, [320.0, 240.0, 1.0 / 320.0, 1.0 / 240.0]);
    }

    #[test]
    fn test_programs_compile_with_pass_filter_and_format() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[]);
        let first = fixture.push_pass(&["Texture"], false);
        first.filter = FilterMode::Nearest;
        first.format = TargetFormat::Rgba16Float;
        fixture.push_pass(&["Texture"], false).format = TargetFormat::Rgba8UnormSrgb;
        fixture.open(&mut pipeline).unwrap();

        let passes = pipeline.chain().unwrap().passes();
        assert_eq!(passes[0].program.filter, FilterMode::Nearest);
        assert_eq!(passes[0].program.format, ProgramFormat::Target(TargetFormat::Rgba16Float));
        // The last pass renders to the host surface whatever its declared format
        assert_eq!(passes[1].program.filter, FilterMode::Linear);
        assert_eq!(passes[1].program.format, ProgramFormat::Output);
        assert_eq!(passes[1].program.label, "pass 1");
    }

    #[test]
    fn test_intermediate_passes_cover_their_target() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture"]]);
        fixture.preset.passes[0].scale = PassScale::uniform(ScaleType::Input, ScaleFactor::new(2, 1));
        fixture.push_pass(&["Texture"], false);
        fixture.open(&mut pipeline).unwrap();

        let frames = draw_frames(&mut pipeline, 1);
        let first = &frames[0][0];
        assert_eq!(first.attribute(0), Some([0.0, 0.0, 640.0, 0.0, 0.0, 480.0, 640.0, 480.0]));
        assert_eq!(first.call.uniforms.mvp, orthographic(640.0, 480.0));
        assert_eq!(frames[0][1].call.uniforms.input_size[..2], [640.0, 480.0]);
    }

    #[test]
    fn test_pass_history_reads_previous_frames() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture", "Pass0PrevTexture"]]).open(&mut pipeline).unwrap();

        let frames = draw_frames(&mut pipeline, 4);
        // Two slots: this frame's target and last frame's
        assert_eq!(pipeline.backend().targets.len(), 2);

        // Nothing recorded yet: the other, cleared slot
        assert_ne!(frames[0][1].texture(3), frames[0][0].target);
        for frame in 1..4 {
            assert_eq!(frames[frame][1].texture(3), frames[frame - 1][0].target);
            assert_eq!(frames[frame][1].texture(2), frames[frame][0].target);
        }
    }

    #[test]
    fn test_deep_pass_history_clamps_to_first_frame() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture", "Pass0Prev2Texture"]]).open(&mut pipeline).unwrap();

        let frames = draw_frames(&mut pipeline, 5);
        // Three frames back plus the current one
        assert_eq!(pipeline.backend().targets.len(), 4);

        // Until three frames have been recorded the oldest is frame 0
        for frame in 1..=3 {
            assert_eq!(frames[frame][1].texture(3), frames[0][0].target);
        }
        assert_eq!(frames[4][1].texture(3), frames[1][0].target);
        assert_eq!(frames[4][1].texture(2), frames[4][0].target);
    }

    #[test]
    fn test_source_history_is_copied_each_frame() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture", "OrigPrevTexture"], &["Texture"]]).open(&mut pipeline).unwrap();
        assert!(pipeline.chain().unwrap().needs_source_history());

        let frames = draw_frames(&mut pipeline, 3);
        for frame in 1..3 {
            let draws = &frames[frame];
            assert_eq!(draws.len(), 3);
            assert_eq!(draws[0].program, "source history copy");
            assert_eq!(draws[1].texture(3), frames[frame - 1][0].target);
        }
    }

    #[test]
    fn test_output_size_changes_are_coalesced() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture"]]);
        fixture.preset.passes[0].scale = PassScale::uniform(ScaleType::Viewport, ScaleFactor::ONE);
        fixture.push_pass(&["Texture"], false);
        fixture.open(&mut pipeline).unwrap();

        draw_frames(&mut pipeline, 1);
        assert_eq!(pipeline.backend().targets.len(), 1);

        pipeline.set_output_size(640, 480);
        pipeline.set_output_size(800, 600);
        pipeline.set_output_size(1024, 768);
        draw_frames(&mut pipeline, 2);

        let targets = &pipeline.backend().targets;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].size, (1024, 768));
    }

    #[test]
    fn test_close_falls_back_to_passthrough() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"]]).open(&mut pipeline).unwrap();
        pipeline.close();
        assert!(!pipeline.is_initialized());
        assert_eq!(pipeline.pass_count(), 0);

        let frames = draw_frames(&mut pipeline, 1);
        assert_eq!(frames[0].len(), 1);
        assert_eq!(frames[0][0].program, "passthrough");
        assert_eq!(frames[0][0].target, None);
    }

    #[test]
    fn test_reopen_replaces_bindings() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"]]).open(&mut pipeline).unwrap();
        draw_frames(&mut pipeline, 3);
        assert_eq!(pipeline.frame_count(), 3);

        Fixture::new(&[&["OrigTexture"]]).open(&mut pipeline).unwrap();
        assert_eq!(pipeline.frame_count(), 0);
        assert_eq!(pipeline.pass_count(), 1);

        let source = pipeline.backend_mut().host_texture(32, 32);
        pipeline.draw_texture(&source, &MockOutput, QUAD, UNIT_QUAD);
        let draw = pipeline.backend().draws.last().unwrap();
        assert_eq!(draw.target, None);
        assert_eq!(draw.texture(2), Some(source.id));
    }

    #[test]
    fn test_out_of_range_pass_keeps_pipeline_closed() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"]]).open(&mut pipeline).unwrap();

        let result = Fixture::new(&[&["Texture"], &["Pass3Texture"], &["Texture"]]).open(&mut pipeline);
        assert!(matches!(result, Err(PipelineError::BindingResolution(_))));
        assert!(!pipeline.is_initialized());
        assert_eq!(draw_frames(&mut pipeline, 1)[0][0].program, "passthrough");
    }

    #[test]
    fn test_frame_count_cycles() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[]);
        fixture.push_pass(&["Texture"], true);
        fixture.push_pass(&["Texture"], true).frame_count_mod = Some(2);
        fixture.push_pass(&["Texture"], false);
        fixture.open(&mut pipeline).unwrap();

        let counts: Vec<[u32; 3]> = draw_frames(&mut pipeline, 4)
            .iter()
            .map(|draws| [0, 1, 2].map(|pass| draws[pass].call.uniforms.frame_count))
            .collect();
        assert_eq!(counts, [[0, 0, 0], [1, 1, 0], [2, 0, 0], [3, 1, 0]]);
    }

    #[test]
    fn test_lookup_textures_are_bound_by_id() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture", "LUT"]]);
        fixture.preset.textures.push(TextureReference {
            id: "LUT".to_string(),
            path: PathBuf::from("lut.png"),
        });
        fixture.files.insert(PathBuf::from("lut.png"), png_bytes(16, 16));
        fixture.open(&mut pipeline).unwrap();

        let lut = pipeline.chain().unwrap().textures().find("LUT").map(|texture| texture.texture.id);
        let frames = draw_frames(&mut pipeline, 1);
        assert_eq!(frames[0][0].texture(3), lut);
    }

    #[test]
    fn test_missing_lookup_texture_fails_open() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture"]]);
        fixture.preset.textures.push(TextureReference {
            id: "LUT".to_string(),
            path: PathBuf::from("lut.png"),
        });

        let result = fixture.open(&mut pipeline);
        assert!(matches!(result, Err(PipelineError::ResourceLoad(ResourceError::Read { .. }))));
        assert!(!pipeline.is_initialized());
    }

    #[test]
    fn test_oversized_absolute_target_fails_open() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture"], &["Texture"]]);
        fixture.preset.passes[0].scale = PassScale::uniform(ScaleType::Absolute, ScaleFactor::new(10000, 1));

        let result = fixture.open(&mut pipeline);
        assert!(matches!(result, Err(PipelineError::TargetAllocation(TargetError::TooLarge { width: 10000, .. }))));
        assert!(pipeline.backend().targets.is_empty());
    }

    #[test]
    fn test_failed_resize_falls_back_to_passthrough() {
        let mut pipeline = pipeline();
        Fixture::new(&[&["Texture"], &["Texture"]]).open(&mut pipeline).unwrap();
        pipeline.backend_mut().fail_targets = true;

        let frames = draw_frames(&mut pipeline, 2);
        assert!(!pipeline.is_initialized());
        assert_eq!(frames[0].len(), 1);
        assert_eq!(frames[1][0].program, "passthrough");
        assert_eq!(pipeline.backend().frames, 2);
    }

    #[test]
    fn test_shader_compile_errors_name_the_pass() {
        let mut pipeline = pipeline();
        let mut fixture = Fixture::new(&[&["Texture"], &["Texture"]]);
        fixture.files.insert(PathBuf::from("pass1.wgsl"), b"fn broken(".to_vec());

        let result = fixture.open(&mut pipeline);
        assert!(matches!(result, Err(PipelineError::ShaderCompile { pass: 1, .. })));
    }
}
