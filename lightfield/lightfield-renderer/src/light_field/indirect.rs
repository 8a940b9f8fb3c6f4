//! Adds probe lighting to the light buffer, modulated by the G-buffer material.

use wgpu::CommandEncoder;

use crate::resources::{GBufferTargets, LIGHT_BUFFER_FORMAT};
use crate::shader;

const INDIRECT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/indirect.wgsl"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndirectKind {
    /// Irradiance times albedo.
    Diffuse,
    /// Glossy radiance times specular reflectance.
    Specular,
}

pub struct IndirectLighting {
    diffuse_pipeline: wgpu::RenderPipeline,
    specular_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl IndirectLighting {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "indirect_shader", INDIRECT_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("indirect_bind_group_layout"),
            entries: &[
                shader::float_texture_entry(0),
                shader::float_texture_entry(1),
                shader::float_texture_entry(2),
                shader::depth_texture_entry(3),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("indirect_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let targets = [Some(wgpu::ColorTargetState {
            format: LIGHT_BUFFER_FORMAT,
            blend: Some(shader::additive_blend()),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        Self {
            diffuse_pipeline: shader::fullscreen_pipeline(device, "indirect_diffuse_pipeline", &module, &layout, "fs_diffuse", &targets),
            specular_pipeline: shader::fullscreen_pipeline(device, "indirect_specular_pipeline", &module, &layout, "fs_specular", &targets),
            bind_group_layout,
        }
    }

    /// Add `lighting` (full-resolution, same size as the G-buffer) into `light_buffer`.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        kind: IndirectKind,
        lighting: &wgpu::TextureView,
        gbuffer: &GBufferTargets,
        light_buffer: &wgpu::TextureView,
    ) {
        let diffuse_opacity = gbuffer.diffuse_opacity_view();
        let specular_roughness = gbuffer.specular_roughness_view();
        let depth = gbuffer.depth_view();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("indirect_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(lighting) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&diffuse_opacity) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&specular_roughness) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&depth) },
            ],
        });
        let pipeline = match kind {
            IndirectKind::Diffuse => &self.diffuse_pipeline,
            IndirectKind::Specular => &self.specular_pipeline,
        };
        shader::draw_fullscreen(encoder, "indirect_lighting", pipeline, &bind_group, light_buffer, wgpu::LoadOp::Load);
    }
}
