//! wgpu implementation of [`RenderBackend`]
//!
//! Every pass program becomes a render pipeline drawing a 4-vertex triangle
//! strip, with one vertex buffer per reflected attribute and a single bind
//! group (group 0) holding the uniform block, textures and samplers. Uniform
//! and vertex buffers belong to the program and are rewritten through the
//! queue on every draw, so a program may be drawn at most once per frame.
//! Draws of a frame are recorded into one command encoder that is submitted by
//! [`RenderBackend::end_frame`].

use shaderchain_preset::{FilterMode, ProgramInterface, ShaderError, TargetFormat, reflect_wgsl};
use wgpu::util::DeviceExt;

use crate::backend::{DrawCall, DrawTarget, ProgramFormat, RenderBackend};
use crate::error::BackendError;

/// A texture together with its default view
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl WgpuTexture {
    pub fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// A compiled pass program
#[derive(Debug)]
pub struct WgpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: Option<wgpu::Buffer>,
    /// One per reflected attribute, in declaration order
    vertex_buffers: Vec<wgpu::Buffer>,
    interface: ProgramInterface,
}

/// Byte size of one quad attribute: four vertices of two floats
const QUAD_ATTRIBUTE_SIZE: u64 = 8 * std::mem::size_of::<f32>() as u64;

/// Describes the buffers a program owns for the lifetime of its pipeline
///
/// # Arguments
/// * `label` - Program label, reused for the uniform buffer
/// * `interface` - Reflected program interface
fn buffer_descriptors<'a>(label: &'a str, interface: &'a ProgramInterface) -> (Option<wgpu::BufferDescriptor<'a>>, Vec<wgpu::BufferDescriptor<'a>>) {
    let uniform = interface.uniforms.as_ref().map(|block| wgpu::BufferDescriptor {
        label: Some(label),
        size: block.size as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let vertex = interface
        .attributes
        .iter()
        .map(|attribute| wgpu::BufferDescriptor {
            label: Some(&attribute.name),
            size: QUAD_ATTRIBUTE_SIZE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
        .collect();
    (uniform, vertex)
}

/// Maps a preset target format to its wgpu format
pub fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Renders on a wgpu device
///
/// The host output is a [`wgpu::TextureView`] of `output_format`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    output_format: wgpu::TextureFormat,
    encoder: Option<wgpu::CommandEncoder>,
    /// Bound to texture slots no source was resolved for
    placeholder: WgpuTexture,
}

impl WgpuBackend {
    /// Creates a backend
    ///
    /// # Arguments
    /// * `device` - Device all resources are created on
    /// * `queue` - Queue frames are submitted to
    /// * `output_format` - Format of the views passed as draw output
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, output_format: wgpu::TextureFormat) -> Self {
        let placeholder = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("Placeholder Texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0, 0, 0, 0],
        );

        Self {
            device,
            queue,
            output_format,
            encoder: None,
            placeholder: WgpuTexture::new(placeholder),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Runs `create` inside validation and out-of-memory error scopes
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create(&self.device);
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        match out_of_memory.or(validation) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn create_sampler(&self, label: &str, filter: FilterMode) -> wgpu::Sampler {
        let filter = match filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        })
    }
}

impl RenderBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type Target = WgpuTexture;
    type Program = WgpuProgram;
    type Output = wgpu::TextureView;

    fn compile_program(&mut self, label: &str, source: &str, filter: FilterMode, format: ProgramFormat) -> Result<WgpuProgram, ShaderError> {
        let interface = reflect_wgsl(source)?;
        let format = match format {
            ProgramFormat::Target(format) => texture_format(format),
            ProgramFormat::Output => self.output_format,
        };

        let mut bind_group_layout_entries = Vec::new();

        if let Some(block) = &interface.uniforms {
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: block.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(block.size as u64),
                },
                count: None,
            });
        }

        for texture in &interface.textures {
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: texture.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        for binding in &interface.samplers {
            bind_group_layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: *binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        bind_group_layout_entries.sort_by_key(|entry| entry.binding);

        // One tightly packed vec2<f32> buffer per attribute, in location order
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = interface
            .attributes
            .iter()
            .map(|attribute| {
                [wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 0,
                    shader_location: attribute.location,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = vertex_attributes
            .iter()
            .map(|attributes| wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        let (pipeline, bind_group_layout) = self
            .scoped(|device| {
                let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });

                let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &bind_group_layout_entries,
                });

                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });

                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    cache: None,
                    vertex: wgpu::VertexState {
                        module: &shader_module,
                        buffers: &vertex_buffers,
                        compilation_options: Default::default(),
                        entry_point: Some(&interface.vertex_entry),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader_module,
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                        entry_point: Some(&interface.fragment_entry),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        strip_index_format: None,
                        cull_mode: None,
                        front_face: wgpu::FrontFace::Ccw,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        conservative: false,
                        unclipped_depth: false,
                    },
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    multiview: None,
                    depth_stencil: None,
                });

                (pipeline, bind_group_layout)
            })
            .map_err(ShaderError::Backend)?;

        let (uniform_buffer, vertex_buffers) = {
            let (uniform, vertex) = buffer_descriptors(label, &interface);
            (
                uniform.map(|descriptor| self.device.create_buffer(&descriptor)),
                vertex.iter().map(|descriptor| self.device.create_buffer(descriptor)).collect(),
            )
        };

        Ok(WgpuProgram {
            label: label.to_string(),
            pipeline,
            bind_group_layout,
            sampler: self.create_sampler(label, filter),
            uniform_buffer,
            vertex_buffers,
            interface,
        })
    }

    fn program_interface<'a>(&self, program: &'a WgpuProgram) -> &'a ProgramInterface {
        &program.interface
    }

    fn create_target(&mut self, label: &str, width: u32, height: u32, format: TargetFormat) -> Result<WgpuTexture, BackendError> {
        let texture = self
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(format),
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })
            .map_err(BackendError)?;
        Ok(WgpuTexture::new(texture))
    }

    fn target_texture(&self, target: &WgpuTexture) -> WgpuTexture {
        target.clone()
    }

    fn upload_texture(&mut self, label: &str, image: &image::RgbaImage) -> Result<WgpuTexture, BackendError> {
        let (width, height) = image.dimensions();
        let queue = &self.queue;
        let texture = self
            .scoped(|device| {
                device.create_texture_with_data(
                    queue,
                    &wgpu::TextureDescriptor {
                        label: Some(label),
                        size: wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[],
                    },
                    wgpu::util::TextureDataOrder::LayerMajor,
                    image.as_raw(),
                )
            })
            .map_err(BackendError)?;
        Ok(WgpuTexture::new(texture))
    }

    fn texture_size(&self, texture: &WgpuTexture) -> (u32, u32) {
        (texture.texture.width(), texture.texture.height())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn draw(&mut self, program: &WgpuProgram, target: DrawTarget<'_, Self>, call: &DrawCall<WgpuTexture>) {
        let interface = &program.interface;

        let mut bind_group_entries = Vec::new();

        if let (Some(block), Some(buffer)) = (&interface.uniforms, &program.uniform_buffer) {
            self.queue.write_buffer(buffer, 0, &call.uniforms.pack(block));
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: block.binding,
                resource: buffer.as_entire_binding(),
            });
        }

        for texture in &interface.textures {
            let view = call
                .textures
                .iter()
                .find(|(binding, _)| *binding == texture.binding)
                .map_or(&self.placeholder.view, |(_, bound)| &bound.view);
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: texture.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        for binding in &interface.samplers {
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(&program.sampler),
            });
        }

        bind_group_entries.sort_by_key(|entry| entry.binding);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.label),
            layout: &program.bind_group_layout,
            entries: &bind_group_entries,
        });

        // Attributes without data (unresolved names) read zeros
        for (attribute, buffer) in interface.attributes.iter().zip(&program.vertex_buffers) {
            let data = call.attributes.iter().find(|(location, _)| *location == attribute.location).map_or([0.0; 8], |(_, data)| *data);
            self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&data));
        }

        let (view, load) = match target {
            DrawTarget::Offscreen(target) => (&target.view, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)),
            DrawTarget::Output(view) => (view, wgpu::LoadOp::Load),
        };

        let device = &self.device;
        let encoder = self
            .encoder
            .get_or_insert_with(|| device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Shader Preset Frame") }));

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&program.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });

        render_pass.set_pipeline(&program.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        for (slot, buffer) in program.vertex_buffers.iter().enumerate() {
            render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        render_pass.draw(0..4, 0..1);
    }

    fn end_frame(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}
