//! In-memory backend that records what the pipeline asks of it

use shaderchain_preset::{FilterMode, ProgramInterface, ShaderError, TargetFormat, reflect_wgsl};

use crate::backend::{DrawCall, DrawTarget, ProgramFormat, RenderBackend};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockTexture {
    pub id: u32,
    pub size: (u32, u32),
}

#[derive(Debug)]
pub(crate) struct MockProgram {
    pub label: String,
    pub interface: ProgramInterface,
    pub filter: FilterMode,
    pub format: ProgramFormat,
}

#[derive(Debug)]
pub(crate) struct MockOutput;

#[derive(Debug, Clone)]
pub(crate) struct RecordedDraw {
    pub program: String,
    /// `None` for the output surface
    pub target: Option<u32>,
    pub call: DrawCall<MockTexture>,
}

impl RecordedDraw {
    /// Id of the texture bound at `binding`
    pub fn texture(&self, binding: u32) -> Option<u32> {
        self.call.textures.iter().find(|(b, _)| *b == binding).map(|(_, texture)| texture.id)
    }

    pub fn attribute(&self, location: u32) -> Option<[f32; 8]> {
        self.call.attributes.iter().find(|(l, _)| *l == location).map(|(_, data)| *data)
    }
}

pub(crate) struct RecordingBackend {
    next_id: u32,
    pub max_dimension: u32,
    pub fail_targets: bool,
    pub targets: Vec<MockTexture>,
    pub uploads: Vec<String>,
    pub programs: Vec<String>,
    pub draws: Vec<RecordedDraw>,
    pub frames: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            max_dimension: 8192,
            fail_targets: false,
            targets: Vec::new(),
            uploads: Vec::new(),
            programs: Vec::new(),
            draws: Vec::new(),
            frames: 0,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// A texture the host would own, such as the pipeline source
    pub fn host_texture(&mut self, width: u32, height: u32) -> MockTexture {
        MockTexture {
            id: self.next_id(),
            size: (width, height),
        }
    }
}

impl RenderBackend for RecordingBackend {
    type Texture = MockTexture;
    type Target = MockTexture;
    type Program = MockProgram;
    type Output = MockOutput;

    fn compile_program(&mut self, label: &str, source: &str, filter: FilterMode, format: ProgramFormat) -> Result<MockProgram, ShaderError> {
        let interface = reflect_wgsl(source)?;
        self.programs.push(label.to_string());
        Ok(MockProgram {
            label: label.to_string(),
            interface,
            filter,
            format,
        })
    }

    fn program_interface<'a>(&self, program: &'a MockProgram) -> &'a ProgramInterface {
        &program.interface
    }

    fn create_target(&mut self, _label: &str, width: u32, height: u32, _format: TargetFormat) -> Result<MockTexture, BackendError> {
        if self.fail_targets {
            return Err(BackendError("out of memory".to_string()));
        }
        let target = MockTexture {
            id: self.next_id(),
            size: (width, height),
        };
        self.targets.push(target.clone());
        Ok(target)
    }

    fn target_texture(&self, target: &MockTexture) -> MockTexture {
        target.clone()
    }

    fn upload_texture(&mut self, label: &str, image: &image::RgbaImage) -> Result<MockTexture, BackendError> {
        self.uploads.push(label.to_string());
        Ok(MockTexture {
            id: self.next_id(),
            size: image.dimensions(),
        })
    }

    fn texture_size(&self, texture: &MockTexture) -> (u32, u32) {
        texture.size
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn draw(&mut self, program: &MockProgram, target: DrawTarget<'_, Self>, call: &DrawCall<MockTexture>) {
        self.draws.push(RecordedDraw {
            program: program.label.clone(),
            target: match target {
                DrawTarget::Offscreen(target) => Some(target.id),
                DrawTarget::Output(_) => None,
            },
            call: call.clone(),
        });
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }
}

/// Encodes a solid PNG image
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 128, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).expect("PNG encoding");
    bytes.into_inner()
}
