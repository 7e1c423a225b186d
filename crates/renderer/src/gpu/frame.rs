use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use livereload::Stage;

use crate::capture::RgbFrame;
use crate::programs::ProgramTable;
use crate::shaders::{BLIT_FRAGMENT, BLIT_VERTEX};

use super::backend::{compile_glsl, fullscreen_pipeline, pass_format, texture_layout, WgpuBackend};
use super::uniforms::FrameUniforms;

struct PassTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Binds this target as the input of the following pass.
    sampled: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    uniforms: wgpu::BindGroup,
}

struct Readback {
    buffer: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

/// Offscreen chain of pass targets plus the blit onto the window surface.
pub(crate) struct FrameGraph {
    width: u32,
    height: u32,
    targets: Vec<PassTarget>,
    empty_input: wgpu::BindGroup,
    blit_pipeline: wgpu::RenderPipeline,
    blit_input: wgpu::BindGroup,
    readback: Readback,
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

impl FrameGraph {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        backend: &WgpuBackend,
        pass_count: usize,
        (width, height): (u32, u32),
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        if pass_count == 0 {
            return Err(anyhow!("frame graph needs at least one pass"));
        }
        let layouts = backend.layouts();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("pass sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let targets = (0..pass_count)
            .map(|pass| {
                let format = pass_format(pass, pass_count);
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("pass {pass} target")),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                let sampled = texture_bind_group(device, &layouts.previous, &view, &sampler);
                let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("pass {pass} uniforms")),
                    size: std::mem::size_of::<FrameUniforms>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let uniforms = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("pass {pass} uniform bind group")),
                    layout: &layouts.uniforms,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    }],
                });
                PassTarget {
                    texture,
                    view,
                    sampled,
                    uniform_buffer,
                    uniforms,
                }
            })
            .collect::<Vec<_>>();

        let empty_input = {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("empty pass input"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &[0, 0, 0, 255],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4),
                    rows_per_image: Some(1),
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            texture_bind_group(device, &layouts.previous, &view, &sampler)
        };

        let blit_layout = texture_layout(device, "blit layout");
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&blit_layout],
            push_constant_ranges: &[],
        });
        let blit_vertex = compile_glsl(device, "blit vertex", Stage::Vertex, BLIT_VERTEX)
            .context("built-in blit vertex shader failed to compile")?;
        let blit_fragment = compile_glsl(device, "blit fragment", Stage::Fragment, BLIT_FRAGMENT)
            .context("built-in blit fragment shader failed to compile")?;
        let blit_pipeline = fullscreen_pipeline(
            device,
            "blit pipeline",
            &blit_pipeline_layout,
            &blit_vertex,
            &blit_fragment,
            surface_format,
        );
        let last = targets
            .last()
            .context("frame graph has no pass targets")?;
        let blit_input = texture_bind_group(device, &blit_layout, &last.view, &sampler);

        let padded_bytes_per_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = Readback {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("capture readback"),
                size: u64::from(padded_bytes_per_row) * u64::from(height),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
            padded_bytes_per_row,
        };

        tracing::debug!(width, height, passes = pass_count, "frame graph ready");
        Ok(Self {
            width,
            height,
            targets,
            empty_input,
            blit_pipeline,
            blit_input,
            readback,
        })
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Encodes every pass in order, then the blit onto `surface_view` if any.
    pub(crate) fn encode(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        time: f64,
        programs: &ProgramTable<WgpuBackend>,
        surface_view: Option<&wgpu::TextureView>,
    ) -> wgpu::CommandBuffer {
        for (pass, target) in self.targets.iter().enumerate() {
            let uniforms = FrameUniforms::new(self.width, self.height, time, pass);
            queue.write_buffer(&target.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });

        for (pass, (target, program)) in self.targets.iter().zip(programs.passes()).enumerate() {
            let input = match pass {
                0 => &self.empty_input,
                _ => &self.targets[pass - 1].sampled,
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("demo pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
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
            render_pass.set_pipeline(program.program());
            render_pass.set_bind_group(0, &target.uniforms, &[]);
            render_pass.set_bind_group(1, input, &[]);
            render_pass.draw(0..3, 0..1);
        }

        if let Some(view) = surface_view {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
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
            render_pass.set_pipeline(&self.blit_pipeline);
            render_pass.set_bind_group(0, &self.blit_input, &[]);
            render_pass.draw(0..3, 0..1);
        }

        encoder.finish()
    }

    /// Copies the final pass back to the CPU and waits for it.
    pub(crate) fn read_final(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<RgbFrame> {
        let last = self
            .targets
            .last()
            .context("frame graph has no pass targets")?;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("capture encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &last.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.readback.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = self.readback.buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .context("failed waiting for frame readback")?;
        receiver
            .recv()
            .map_err(|_| anyhow!("readback callback never fired"))?
            .context("failed to map readback buffer")?;

        let frame = {
            let mapped = slice.get_mapped_range();
            RgbFrame::from_padded_rgba(
                self.width,
                self.height,
                self.readback.padded_bytes_per_row,
                &mapped,
            )
        };
        self.readback.buffer.unmap();
        Ok(frame?)
    }
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("texture bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}
