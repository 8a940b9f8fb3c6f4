//! Temporal accumulation used by SSR: reproject history with motion vectors, clamp it to the
//! current frame's 3x3 neighbourhood and blend with `alpha`.

use glam::Vec4;
use wgpu::CommandEncoder;

use crate::shader;

const TEMPORAL_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/temporal.wgsl"));

pub const DEFAULT_ALPHA: f32 = 0.1;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct TemporalParams {
    alpha: f32,
    history_valid: u32,
    _pad: [f32; 2],
}

pub struct TemporalAccumulation {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl TemporalAccumulation {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let module = shader::create_module(device, "temporal_shader", TEMPORAL_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("temporal_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<TemporalParams>() as u64),
                shader::float_texture_entry(1),
                shader::float_texture_entry(2),
                shader::float_texture_entry(3),
                shader::sampler_entry(4, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("temporal_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "temporal_pipeline",
            &module,
            &layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(format))],
        );
        Self { pipeline, bind_group_layout, sampler: shader::linear_clamp_sampler(device, "temporal_sampler") }
    }

    /// Blend `current` with `history` into `target`. `target` must not alias either input.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        current: &wgpu::TextureView,
        history: &wgpu::TextureView,
        motion: &wgpu::TextureView,
        history_valid: bool,
        alpha: f32,
        target: &wgpu::TextureView,
    ) {
        let params = TemporalParams { alpha, history_valid: history_valid as u32, _pad: [0.0; 2] };
        let buf = shader::write_uniform(device, queue, "temporal_params", &params);
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("temporal_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(current) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(history) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(motion) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });
        shader::draw_fullscreen(encoder, "temporal_accumulation", &self.pipeline, &bg, target, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
    }
}

/// CPU mirror of the shader for zero motion. `history == None` returns `current`.
pub fn resolve_cpu(current: &[Vec4], history: Option<&[Vec4]>, width: u32, height: u32, alpha: f32) -> Vec<Vec4> {
    let Some(history) = history else {
        return current.to_vec();
    };
    let (w, h) = (width as i32, height as i32);
    let mut out = Vec::with_capacity(current.len());
    for y in 0..h {
        for x in 0..w {
            let mut lo = Vec4::splat(f32::INFINITY);
            let mut hi = Vec4::splat(f32::NEG_INFINITY);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let qx = (x + dx).clamp(0, w - 1);
                    let qy = (y + dy).clamp(0, h - 1);
                    let c = current[(qy * w + qx) as usize];
                    lo = lo.min(c);
                    hi = hi.max(c);
                }
            }
            let idx = (y * w + x) as usize;
            let hist = history[idx].clamp(lo, hi);
            out.push(hist.lerp(current[idx], alpha));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_passes_current_through() {
        let cur = vec![Vec4::new(0.3, 0.2, 0.1, 1.0); 4];
        assert_eq!(resolve_cpu(&cur, None, 2, 2, DEFAULT_ALPHA), cur);
    }

    #[test]
    fn history_outside_neighbourhood_is_clamped() {
        let cur = vec![Vec4::splat(0.5); 9];
        let hist = vec![Vec4::splat(10.0); 9];
        let out = resolve_cpu(&cur, Some(&hist), 3, 3, DEFAULT_ALPHA);
        for v in out {
            assert!((v - Vec4::splat(0.5)).abs().max_element() < 1e-6);
        }
    }

    #[test]
    fn accumulation_converges_geometrically() {
        // Neighbourhood spans [0, 1]; history starts at 0 and must approach the current 1.0 texel.
        let mut cur = vec![Vec4::ZERO; 9];
        cur[4] = Vec4::ONE;
        let mut hist = vec![Vec4::ZERO; 9];
        for _ in 0..100 {
            hist = resolve_cpu(&cur, Some(&hist), 3, 3, DEFAULT_ALPHA);
        }
        assert!((hist[4] - Vec4::ONE).abs().max_element() < 1e-3);
    }
}
