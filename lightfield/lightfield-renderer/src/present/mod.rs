//! Present pass: sample light buffer (Rgba16Float), tone map, render to swapchain.

use wgpu::CommandEncoder;

use crate::config::ToneMapping;
use crate::shader;

const PRESENT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/present.wgsl"));

pub struct PresentPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    tone_mapping: ToneMapping,
}

impl PresentPass {
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat, tone_mapping: ToneMapping) -> Self {
        let module = shader::create_module(device, "present_shader", PRESENT_SHADER);
        let sampler = shader::linear_clamp_sampler(device, "present_sampler");
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present_bind_group_layout"),
            entries: &[
                shader::float_texture_entry(0),
                shader::sampler_entry(1, wgpu::SamplerBindingType::Filtering),
                shader::uniform_entry(2, wgpu::ShaderStages::FRAGMENT, 4),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("present_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "present_pipeline",
            &module,
            &pipeline_layout,
            "fs",
            &[Some(wgpu::ColorTargetState { format: output_format, blend: None, write_mask: wgpu::ColorWrites::ALL })],
        );
        Self { pipeline, bind_group_layout, sampler, tone_mapping }
    }

    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        light_buffer_view: &wgpu::TextureView,
        output_view: &wgpu::TextureView,
    ) {
        let mode: u32 = self.tone_mapping.code();
        let tone_buf = shader::write_uniform(device, queue, "present_tone_uniform", &mode);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(light_buffer_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: tone_buf.as_entire_binding() },
            ],
        });
        shader::draw_fullscreen(encoder, "present_pass", &self.pipeline, &bind_group, output_view, wgpu::LoadOp::Clear(wgpu::Color::BLACK));
    }
}
