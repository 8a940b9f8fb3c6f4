//! Probe filtering: the radiance slice becomes a low-resolution irradiance slice and the distance
//! slice becomes `(E[d], E[d^2])` moments for Chebyshev visibility.

use glam::{Vec2, Vec3, Vec4};
use wgpu::CommandEncoder;

use crate::shader;

use super::octahedral::{oct_decode, oct_encode};

const PROBE_FILTER_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/probe_filter.wgsl"));

pub const IRRADIANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const MOMENTS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;

const GOLDEN_ANGLE: f32 = 2.399_963_2;

#[derive(Clone, Copy, Debug)]
pub struct FilterSettings {
    /// Sphere directions integrated per output texel.
    pub sample_count: u32,
    /// Exponent on the cosine lobe for distance moments; higher keeps occluder edges sharp.
    pub depth_sharpness: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { sample_count: 512, depth_sharpness: 50.0 }
    }
}

/// `i`-th of `n` points of a spherical Fibonacci lattice.
pub fn fibonacci_direction(i: u32, n: u32) -> Vec3 {
    let z = 1.0 - (2.0 * i as f32 + 1.0) / n as f32;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = i as f32 * GOLDEN_ANGLE;
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

fn oct_index(dir: Vec3, res: u32) -> usize {
    let uv = oct_encode(dir) * res as f32;
    let max = res as i32 - 1;
    let x = (uv.x as i32).clamp(0, max) as usize;
    let y = (uv.y as i32).clamp(0, max) as usize;
    y * res as usize + x
}

/// CPU mirror of `probe_filter.wgsl` for one probe slice.
pub fn filter_probe(
    radiance: &[Vec4],
    distance: &[f32],
    src_res: u32,
    out_res: u32,
    settings: &FilterSettings,
) -> (Vec<Vec3>, Vec<Vec2>) {
    let samples: Vec<Vec3> = (0..settings.sample_count).map(|i| fibonacci_direction(i, settings.sample_count)).collect();
    let mut irradiance = Vec::with_capacity((out_res * out_res) as usize);
    let mut moments = Vec::with_capacity((out_res * out_res) as usize);
    for y in 0..out_res {
        for x in 0..out_res {
            let n = oct_decode((Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) / out_res as f32);
            let (mut irr, mut irr_w) = (Vec3::ZERO, 0.0);
            let (mut mom, mut mom_w) = (Vec2::ZERO, 0.0);
            for &s in &samples {
                let c = n.dot(s);
                if c <= 0.0 {
                    continue;
                }
                let i = oct_index(s, src_res);
                irr += c * radiance[i].truncate();
                irr_w += c;
                let w = c.powf(settings.depth_sharpness);
                let d = distance[i];
                mom += w * Vec2::new(d, d * d);
                mom_w += w;
            }
            irradiance.push(irr / irr_w.max(1e-6));
            moments.push(mom / mom_w.max(1e-6));
        }
    }
    (irradiance, moments)
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FilterParams {
    sample_count: u32,
    depth_sharpness: f32,
    _pad: [u32; 2],
}

pub struct ProbeFiltering {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    settings: FilterSettings,
}

impl ProbeFiltering {
    pub fn new(device: &wgpu::Device, settings: FilterSettings) -> Self {
        let module = shader::create_module(device, "probe_filter_shader", PROBE_FILTER_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("probe_filter_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<FilterParams>() as u64),
                shader::float_texture_entry(1),
                shader::float_texture_entry(2),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("probe_filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "probe_filter_pipeline",
            &module,
            &layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(IRRADIANCE_FORMAT)), Some(wgpu::ColorTargetState::from(MOMENTS_FORMAT))],
        );
        Self { pipeline, bind_group_layout, settings }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: FilterSettings) {
        self.settings = settings;
    }

    /// Filter one probe. All views are single layers of their atlases.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        radiance: &wgpu::TextureView,
        distance: &wgpu::TextureView,
        irradiance_target: &wgpu::TextureView,
        moments_target: &wgpu::TextureView,
    ) {
        let params = FilterParams {
            sample_count: self.settings.sample_count.max(1),
            depth_sharpness: self.settings.depth_sharpness,
            _pad: [0; 2],
        };
        let buf = shader::write_uniform(device, queue, "probe_filter_params", &params);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("probe_filter_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(radiance) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(distance) },
            ],
        });
        shader::draw_fullscreen_mrt(
            encoder,
            "probe_filter",
            &self.pipeline,
            &bind_group,
            &[
                shader::clear_attachment(irradiance_target, wgpu::Color::TRANSPARENT),
                shader::clear_attachment(moments_target, wgpu::Color::TRANSPARENT),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SRC: u32 = 16;
    const OUT: u32 = 4;

    fn settings() -> FilterSettings {
        FilterSettings { sample_count: 256, ..Default::default() }
    }

    #[test]
    fn fibonacci_points_are_unit_and_balanced() {
        let n = 512;
        let mut sum = Vec3::ZERO;
        for i in 0..n {
            let d = fibonacci_direction(i, n);
            assert_relative_eq!(d.length(), 1.0, epsilon = 1e-5);
            sum += d;
        }
        assert!(sum.length() / (n as f32) < 0.01);
    }

    #[test]
    fn constant_inputs_pass_through() {
        let radiance = vec![Vec4::new(0.2, 0.4, 0.8, 1.0); (SRC * SRC) as usize];
        let distance = vec![3.0; (SRC * SRC) as usize];
        let (irr, mom) = filter_probe(&radiance, &distance, SRC, OUT, &settings());
        assert_eq!(irr.len(), (OUT * OUT) as usize);
        for (e, m) in irr.iter().zip(&mom) {
            assert_relative_eq!(e.x, 0.2, epsilon = 1e-4);
            assert_relative_eq!(e.z, 0.8, epsilon = 1e-4);
            assert_relative_eq!(m.x, 3.0, epsilon = 1e-3);
            assert_relative_eq!(m.y, 9.0, epsilon = 1e-2);
        }
    }

    #[test]
    fn irradiance_faces_the_bright_hemisphere() {
        let mut radiance = vec![Vec4::ZERO; (SRC * SRC) as usize];
        for y in 0..SRC {
            for x in 0..SRC {
                let d = oct_decode((Vec2::new(x as f32, y as f32) + Vec2::splat(0.5)) / SRC as f32);
                if d.z > 0.0 {
                    radiance[(y * SRC + x) as usize] = Vec4::ONE;
                }
            }
        }
        let distance = vec![1.0; (SRC * SRC) as usize];
        let (irr, _) = filter_probe(&radiance, &distance, SRC, OUT, &settings());
        let up = irr[oct_index(Vec3::Z, OUT)].x;
        let down = irr[oct_index(Vec3::NEG_Z, OUT)].x;
        assert!(up > 0.8, "up {up}");
        assert!(down < 0.2, "down {down}");
    }
}
