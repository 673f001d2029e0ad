//! Shader Preset CLI Renderer
//!
//! Renders a shader preset over an image file without a window and saves the
//! last frame.
//!
//! # Usage
//! ```bash
//! shaderchain-cli input.png output.png --preset crt/crt.glslp --scale 2.0 --frames 3
//! ```

use clap::Parser;
use shaderchain_wgpu::{PresetPipeline, RenderBackend, UNIT_QUAD, WgpuBackend, orthographic};
use std::path::PathBuf;
use tracing::info;

const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Command-line arguments for the preset renderer
#[derive(Parser)]
#[command(version, about = "Renders a shader preset over an image")]
struct Args {
    /// Input image file path
    input: PathBuf,

    /// Output image file path
    output: PathBuf,

    /// Shader preset (.yaml manifest or .glslp); the image is copied unchanged without one
    #[arg(long, short)]
    preset: Option<PathBuf>,

    /// Output size relative to the input image
    #[arg(long, short, default_value = "1.0")]
    scale: f64,

    /// Number of frames to render, for presets with temporal effects
    #[arg(long, short, default_value = "1")]
    frames: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let input_image = image::open(&args.input)?.to_rgba8();
    let (input_width, input_height) = input_image.dimensions();
    let output_width = ((input_width as f64 * args.scale).round() as u32).max(1);
    let output_height = ((input_height as f64 * args.scale).round() as u32).max(1);
    info!(input = ?(input_width, input_height), output = ?(output_width, output_height), "loaded image");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;

    let mut pipeline = PresetPipeline::new(WgpuBackend::new(device.clone(), queue.clone(), OUTPUT_FORMAT))?;
    if let Some(preset) = &args.preset {
        pipeline.open(preset)?;
        info!(passes = pipeline.pass_count(), "opened {}", preset.display());
    }

    let source = pipeline.backend_mut().upload_texture("Input Texture", &input_image)?;

    let output_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Output Texture"),
        size: wgpu::Extent3d {
            width: output_width,
            height: output_height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let (width, height) = (output_width as f32, output_height as f32);
    pipeline.set_output_size(output_width, output_height);
    pipeline.set_projection_matrix(orthographic(width, height));
    let quad = [0.0, 0.0, width, 0.0, 0.0, height, width, height];

    for _ in 0..args.frames.max(1) {
        pipeline.draw_texture(&source, &output_view, quad, UNIT_QUAD);
    }
    if args.preset.is_some() && !pipeline.is_initialized() {
        return Err("shader preset failed while rendering, see the log".into());
    }

    device.poll(wgpu::PollType::Wait)?;

    let output_image = save_texture_to_image(&device, &queue, &output_texture)?;
    output_image.save(&args.output)?;
    info!("saved {}", args.output.display());

    Ok(())
}

/// Reads an RGBA8 texture back into an image
///
/// # Arguments
/// * `device` - wgpu device for creating GPU resources
/// * `queue` - Command queue for data transfer operations
/// * `texture` - Texture to read, in an 8-bit RGBA format
fn save_texture_to_image(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<image::RgbaImage, Box<dyn std::error::Error>> {
    let (width, height) = (texture.width(), texture.height());

    // Rows of a texture copy must be aligned
    let unpadded_bytes_per_row = width * 4;
    let bytes_per_row = unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Output Buffer"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Copy Encoder") });

    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| sender.send(v).unwrap());

    device.poll(wgpu::PollType::Wait)?;

    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    let data = buffer_slice.get_mapped_range();
    let pixels = data
        .chunks(bytes_per_row as usize)
        .flat_map(|row| &row[..unpadded_bytes_per_row as usize])
        .copied()
        .collect();

    Ok(image::RgbaImage::from_raw(width, height, pixels).ok_or("Failed to create RGBA8 image from data")?)
}
