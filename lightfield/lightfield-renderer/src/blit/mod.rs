//! Fullscreen blit with replace or additive blending.

use wgpu::CommandEncoder;

use crate::shader;

const BLIT_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/blit.wgsl"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlitMode {
    Replace,
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlitFilter {
    Linear,
    Point,
}

pub struct BlitPass {
    replace_pipeline: wgpu::RenderPipeline,
    additive_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    linear_sampler: wgpu::Sampler,
    point_sampler: wgpu::Sampler,
}

impl BlitPass {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let module = shader::create_module(device, "blit_shader", BLIT_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit_bind_group_layout"),
            entries: &[
                shader::float_texture_entry(0),
                shader::sampler_entry(1, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let target = |blend| [Some(wgpu::ColorTargetState { format: target_format, blend, write_mask: wgpu::ColorWrites::ALL })];
        Self {
            replace_pipeline: shader::fullscreen_pipeline(device, "blit_replace_pipeline", &module, &layout, "fs", &target(None)),
            additive_pipeline: shader::fullscreen_pipeline(
                device,
                "blit_additive_pipeline",
                &module,
                &layout,
                "fs",
                &target(Some(shader::additive_blend())),
            ),
            bind_group_layout,
            linear_sampler: shader::linear_clamp_sampler(device, "blit_linear_sampler"),
            point_sampler: shader::point_clamp_sampler(device, "blit_point_sampler"),
        }
    }

    /// Blit `source` onto `target`. A missing source leaves the target untouched.
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        source: Option<&wgpu::TextureView>,
        target: &wgpu::TextureView,
        mode: BlitMode,
        filter: BlitFilter,
    ) {
        let Some(source) = source else {
            log::warn!("blit: no source texture, skipping");
            return;
        };
        let sampler = match filter {
            BlitFilter::Linear => &self.linear_sampler,
            BlitFilter::Point => &self.point_sampler,
        };
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(source) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        });
        let (pipeline, load) = match mode {
            BlitMode::Replace => (&self.replace_pipeline, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)),
            BlitMode::Additive => (&self.additive_pipeline, wgpu::LoadOp::Load),
        };
        shader::draw_fullscreen(encoder, "blit_pass", pipeline, &bind_group, target, load);
    }
}
