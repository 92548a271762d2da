//! Shows the segmentation canvas on the window surface
//!
//! The canvas is uploaded as an sRGB texture and drawn with a fullscreen
//! triangle, letterboxed so its aspect ratio survives any window shape.

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

/// Letterbox parameters for `passthrough.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ViewParams {
    scale: [f32; 2],
    _pad: [f32; 2],
}

/// Fraction of the surface the canvas covers on each axis when scaled to fit
/// without distortion
fn fit_scale(canvas: (u32, u32), surface: (u32, u32)) -> [f32; 2] {
    if canvas.0 == 0 || canvas.1 == 0 || surface.0 == 0 || surface.1 == 0 {
        return [1.0, 1.0];
    }
    let canvas_aspect = canvas.0 as f32 / canvas.1 as f32;
    let surface_aspect = surface.0 as f32 / surface.1 as f32;
    if canvas_aspect > surface_aspect {
        [1.0, surface_aspect / canvas_aspect]
    } else {
        [canvas_aspect / surface_aspect, 1.0]
    }
}

/// Texture holding the latest canvas, with the bind group that samples it
struct CanvasTarget {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

impl CanvasTarget {
    fn matches(&self, width: u32, height: u32) -> bool {
        self.texture.width() == width && self.texture.height() == height
    }
}

pub struct CanvasPresenter {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    view_params: wgpu::Buffer,
    target: Option<CanvasTarget>,
}

fn fragment_entry(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty,
        count: None,
    }
}

impl CanvasPresenter {
    pub fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Canvas Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/passthrough.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Canvas Bind Group Layout"),
            entries: &[
                fragment_entry(
                    0,
                    wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                ),
                fragment_entry(1, wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)),
                fragment_entry(
                    2,
                    wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                ),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Canvas Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Canvas Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(surface_format.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Canvas Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let view_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Canvas View Params"),
            contents: bytemuck::bytes_of(&ViewParams {
                scale: [1.0, 1.0],
                _pad: [0.0; 2],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            pipeline,
            layout,
            sampler,
            view_params,
            target: None,
        }
    }

    /// Copy `canvas` to the GPU, reallocating the texture when its size changed
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, canvas: &RgbaImage) {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        if !self.target.as_ref().is_some_and(|t| t.matches(width, height)) {
            log::info!("Canvas texture resized to {}x{}", width, height);
            self.target = Some(self.create_target(device, width, height));
        }
        let Some(target) = &self.target else { return };

        queue.write_texture(
            target.texture.as_image_copy(),
            canvas.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            target.texture.size(),
        );
    }

    fn create_target(&self, device: &wgpu::Device, width: u32, height: u32) -> CanvasTarget {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Canvas Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Canvas Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.view_params.as_entire_binding(),
                },
            ],
        });

        CanvasTarget { texture, bind_group }
    }

    /// Clear `view` to black and draw the canvas letterboxed into it
    pub fn encode(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        surface_size: (u32, u32),
    ) {
        if let Some(target) = &self.target {
            let params = ViewParams {
                scale: fit_scale((target.texture.width(), target.texture.height()), surface_size),
                _pad: [0.0; 2],
            };
            queue.write_buffer(&self.view_params, 0, bytemuck::bytes_of(&params));
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Canvas Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(target) = &self.target {
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &target.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_scale_letterbox() {
        assert_eq!(fit_scale((640, 480), (640, 480)), [1.0, 1.0]);
        // Wide window: bars left and right
        assert_eq!(fit_scale((640, 480), (1280, 480)), [0.5, 1.0]);
        // Tall window: bars top and bottom
        assert_eq!(fit_scale((640, 480), (640, 960)), [1.0, 0.5]);
        assert_eq!(fit_scale((0, 0), (640, 480)), [1.0, 1.0]);
    }
}
