//! Min-downscale of the distance atlas into the low-res atlas used for coarse ray marching.

use wgpu::CommandEncoder;

use crate::shader;

const DOWNSCALE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/downscale.wgsl"));

pub const LOW_RES_DISTANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

/// Block size mapping `src_res` onto `dst_res`.
pub fn downscale_factor(src_res: u32, dst_res: u32) -> u32 {
    (src_res / dst_res.max(1)).max(1)
}

/// Minimum over `factor` x `factor` blocks of a square `src_res` image.
pub fn downscale_min(src: &[f32], src_res: u32, factor: u32) -> Vec<f32> {
    let dst_res = (src_res / factor).max(1);
    let mut out = Vec::with_capacity((dst_res * dst_res) as usize);
    for y in 0..dst_res {
        for x in 0..dst_res {
            let mut d = f32::MAX;
            for by in 0..factor {
                for bx in 0..factor {
                    let sx = (x * factor + bx).min(src_res - 1);
                    let sy = (y * factor + by).min(src_res - 1);
                    d = d.min(src[(sy * src_res + sx) as usize]);
                }
            }
            out.push(d);
        }
    }
    out
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DownscaleParams {
    factor: u32,
    _pad: [u32; 3],
}

pub struct DownscalePass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl DownscalePass {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "downscale_shader", DOWNSCALE_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("downscale_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<DownscaleParams>() as u64),
                shader::float_texture_entry(1),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("downscale_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "downscale_pipeline",
            &module,
            &layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(LOW_RES_DISTANCE_FORMAT))],
        );
        Self { pipeline, bind_group_layout }
    }

    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &wgpu::TextureView,
        factor: u32,
        target: &wgpu::TextureView,
    ) {
        let buf = shader::write_uniform(device, queue, "downscale_params", &DownscaleParams { factor, _pad: [0; 3] });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("downscale_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(source) },
            ],
        });
        shader::draw_fullscreen(encoder, "downscale", &self.pipeline, &bind_group, target, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_nearest_distance_per_block() {
        let mut src: Vec<f32> = (0..16).map(|i| 10.0 + i as f32).collect();
        src[5] = 1.0;
        let out = downscale_min(&src, 4, 2);
        assert_eq!(out, vec![1.0, 12.0, 18.0, 20.0]);
    }

    #[test]
    fn factor_from_resolutions() {
        assert_eq!(downscale_factor(1024, 32), 32);
        assert_eq!(downscale_factor(16, 32), 1);
    }
}
