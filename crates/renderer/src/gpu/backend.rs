use std::borrow::Cow;

use livereload::Stage;
use wgpu::naga::ShaderStage;

use crate::programs::{ProgramBackend, ShaderError};

/// Format of every pass target except the last.
pub(crate) const INTERMEDIATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the final pass, which is presented and captured.
pub(crate) const FINAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) fn pass_format(pass: usize, pass_count: usize) -> wgpu::TextureFormat {
    if pass + 1 >= pass_count {
        FINAL_FORMAT
    } else {
        INTERMEDIATE_FORMAT
    }
}

/// Bind group layouts every pass pipeline is built against.
#[derive(Clone)]
pub(crate) struct PassLayouts {
    pub uniforms: wgpu::BindGroupLayout,
    pub previous: wgpu::BindGroupLayout,
}

impl PassLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame uniforms layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let previous = texture_layout(device, "previous pass layout");
        Self { uniforms, previous }
    }
}

pub(crate) fn texture_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

/// Compiles GLSL inside a validation scope so bad source becomes an error
/// instead of a device-level failure.
pub(crate) fn compile_glsl(
    device: &wgpu::Device,
    label: &str,
    stage: Stage,
    source: &str,
) -> Result<wgpu::ShaderModule, ShaderError> {
    let naga_stage = match stage {
        Stage::Vertex => ShaderStage::Vertex,
        Stage::Fragment => ShaderStage::Fragment,
    };
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_owned()),
            stage: naga_stage,
            defines: &[],
        },
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(ShaderError::Compile {
            stage,
            log: err.to_string(),
        }),
        None => Ok(module),
    }
}

pub(crate) fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    vertex: &wgpu::ShaderModule,
    fragment: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex,
            entry_point: Some("main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

/// [`ProgramBackend`] that turns GLSL stages into wgpu render pipelines.
pub struct WgpuBackend {
    device: wgpu::Device,
    layouts: PassLayouts,
    pipeline_layout: wgpu::PipelineLayout,
    pass_count: usize,
}

impl WgpuBackend {
    pub(crate) fn new(device: &wgpu::Device, pass_count: usize) -> Self {
        let layouts = PassLayouts::new(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass pipeline layout"),
            bind_group_layouts: &[&layouts.uniforms, &layouts.previous],
            push_constant_ranges: &[],
        });
        Self {
            device: device.clone(),
            layouts,
            pipeline_layout,
            pass_count,
        }
    }

    pub(crate) fn layouts(&self) -> &PassLayouts {
        &self.layouts
    }
}

impl ProgramBackend for WgpuBackend {
    type Stage = wgpu::ShaderModule;
    type Program = wgpu::RenderPipeline;

    fn compile_stage(&mut self, stage: Stage, source: &str) -> Result<Self::Stage, ShaderError> {
        compile_glsl(&self.device, &format!("{stage} stage"), stage, source)
    }

    fn link(
        &mut self,
        pass: usize,
        vertex: &Self::Stage,
        fragment: &Self::Stage,
    ) -> Result<Self::Program, ShaderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = fullscreen_pipeline(
            &self.device,
            &format!("pass {pass} pipeline"),
            &self.pipeline_layout,
            vertex,
            fragment,
            pass_format(pass, self.pass_count),
        );
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(ShaderError::Link {
                pass,
                log: err.to_string(),
            }),
            None => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_last_pass_targets_the_presentable_format() {
        assert_eq!(pass_format(0, 3), INTERMEDIATE_FORMAT);
        assert_eq!(pass_format(1, 3), INTERMEDIATE_FORMAT);
        assert_eq!(pass_format(2, 3), FINAL_FORMAT);
        assert_eq!(pass_format(0, 1), FINAL_FORMAT);
    }
}
