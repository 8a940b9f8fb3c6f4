//! Per-pixel probe lookup: diffuse irradiance with backface and Chebyshev visibility weights over
//! the 8 probes of the containing cell, and glossy radiance marched through the closest probe.

use glam::{IVec3, UVec3, Vec2, Vec3};
use wgpu::CommandEncoder;

use crate::camera::{Camera, CUBE_FACE_FAR};
use crate::resources::GBufferTargets;
use crate::shader;

use super::grid::ProbeGrid;
use super::volume::LightFieldProbeVolume;

const PROBE_TRACE_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/probe_trace.wgsl"));

pub const PROBE_TRACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEFAULT_NORMAL_BIAS: f32 = 0.05;
pub const DEFAULT_GLOSSY_STEPS: u32 = 64;
const REFINE_STEPS: u32 = 8;

pub fn chebyshev(moments: Vec2, distance: f32) -> f32 {
    if distance <= moments.x {
        return 1.0;
    }
    let variance = (moments.y - moments.x * moments.x).abs();
    let delta = distance - moments.x;
    let c = variance / (variance + delta * delta);
    (c * c * c).max(0.0)
}

fn base_cell(grid: &ProbeGrid, p: Vec3) -> IVec3 {
    let step = grid.step().max(Vec3::splat(1e-4));
    let max_cell = grid.counts().as_ivec3() - IVec3::ONE;
    ((p - grid.start()) / step).floor().as_ivec3().clamp(IVec3::ZERO, max_cell)
}

/// Normalised `(probe index, weight)` for the 8 cell corners around `p`. `moments_at(index, dir)`
/// returns a probe's distance moments in direction `dir`.
pub fn probe_weights(
    grid: &ProbeGrid,
    moments_at: impl Fn(u32, Vec3) -> Vec2,
    p: Vec3,
    n: Vec3,
    normal_bias: f32,
) -> Vec<(u32, f32)> {
    let step = grid.step().max(Vec3::splat(1e-4));
    let max_cell = grid.counts().as_ivec3() - IVec3::ONE;
    let base = base_cell(grid, p);
    let alpha = ((p - grid.probe_position(base.as_uvec3())) / step).clamp(Vec3::ZERO, Vec3::ONE);
    let biased = p + n * normal_bias;
    let mut weights = Vec::with_capacity(8);
    for i in 0..8 {
        let offset = IVec3::new(i & 1, (i >> 1) & 1, (i >> 2) & 1);
        let cell: UVec3 = (base + offset).clamp(IVec3::ZERO, max_cell).as_uvec3();
        let probe = grid.probe_position(cell);
        let index = grid.flat_index(cell.x, cell.y, cell.z);
        let o = offset.as_vec3();
        let tri = (Vec3::ONE - alpha) * (Vec3::ONE - o) + alpha * o;

        let to_probe = probe - p;
        let backface = (to_probe / to_probe.length().max(1e-4)).dot(n) * 0.5 + 0.5;
        let from_probe = biased - probe;
        let dist = from_probe.length();
        let vis = chebyshev(moments_at(index, from_probe / dist.max(1e-4)), dist);
        weights.push((index, tri.x * tri.y * tri.z * ((backface * backface + 0.2) * vis).max(1e-4)));
    }
    let total: f32 = weights.iter().map(|(_, w)| w).sum::<f32>().max(1e-6);
    for (_, w) in &mut weights {
        *w /= total;
    }
    weights
}

/// March `dir` from `origin` (relative to the probe). `low_res_at` must never exceed `distance_at`.
/// Returns the probe-space direction of the first hit.
pub fn march_probe(
    distance_at: impl Fn(Vec3) -> f32,
    low_res_at: impl Fn(Vec3) -> f32,
    origin: Vec3,
    dir: Vec3,
    max_distance: f32,
    steps: u32,
) -> Option<Vec3> {
    let steps = steps.max(1);
    let dt = max_distance / steps as f32;
    let mut prev_t = 0.0;
    for i in 1..=steps {
        let t = i as f32 * dt;
        let q = origin + dir * t;
        if q.length() >= low_res_at(q.normalize_or_zero()) {
            for j in 1..=REFINE_STEPS {
                let qf = origin + dir * (prev_t + (t - prev_t) * j as f32 / REFINE_STEPS as f32);
                let d = qf.normalize_or_zero();
                if qf.length() >= distance_at(d) {
                    return Some(d);
                }
            }
        }
        prev_t = t;
    }
    None
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProbeTraceParams {
    inv_view_proj: [f32; 16],
    camera_pos: [f32; 4],
    grid_start: [f32; 4],
    grid_step: [f32; 4],
    grid_counts: [u32; 4],
}

struct TraceTargets {
    diffuse: wgpu::Texture,
    glossy: wgpu::Texture,
    width: u32,
    height: u32,
}

pub struct ProbeRayTracing {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    targets: Option<TraceTargets>,
    pub normal_bias: f32,
    pub glossy_steps: u32,
}

impl ProbeRayTracing {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "probe_trace_shader", PROBE_TRACE_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("probe_trace_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<ProbeTraceParams>() as u64),
                shader::depth_texture_entry(1),
                shader::float_texture_entry(2),
                shader::array_texture_entry(3),
                shader::array_texture_entry(4),
                shader::array_texture_entry(5),
                shader::array_texture_entry(6),
                shader::array_texture_entry(7),
                shader::sampler_entry(8, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("probe_trace_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let target = Some(wgpu::ColorTargetState::from(PROBE_TRACE_FORMAT));
        let pipeline = shader::fullscreen_pipeline(device, "probe_trace_pipeline", &module, &layout, "fs", &[target.clone(), target]);
        Self {
            pipeline,
            bind_group_layout,
            sampler: shader::linear_clamp_sampler(device, "probe_atlas_sampler"),
            targets: None,
            normal_bias: DEFAULT_NORMAL_BIAS,
            glossy_steps: DEFAULT_GLOSSY_STEPS,
        }
    }

    fn ensure_targets(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.targets.as_ref().is_some_and(|t| t.width == width && t.height == height) {
            return;
        }
        log::info!("probe tracing: allocating {}x{}", width, height);
        self.targets = Some(TraceTargets {
            diffuse: shader::render_target(device, "probe_trace_diffuse", width, height, 1, PROBE_TRACE_FORMAT),
            glossy: shader::render_target(device, "probe_trace_glossy", width, height, 1, PROBE_TRACE_FORMAT),
            width,
            height,
        });
    }

    /// Diffuse irradiance from the last `execute`.
    pub fn diffuse_texture(&self) -> Option<&wgpu::Texture> {
        self.targets.as_ref().map(|t| &t.diffuse)
    }

    /// Glossy radiance from the last `execute`.
    pub fn glossy_texture(&self) -> Option<&wgpu::Texture> {
        self.targets.as_ref().map(|t| &t.glossy)
    }

    /// Trace every G-buffer pixel against `volume`. Returns `false` (nothing written) while the
    /// volume has no atlases yet.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &mut self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        volume: &LightFieldProbeVolume,
        gbuffer: &GBufferTargets,
    ) -> bool {
        let Some(atlases) = volume.atlases() else {
            return false;
        };
        self.ensure_targets(device, gbuffer.width(), gbuffer.height());
        let Some(targets) = self.targets.as_ref() else {
            return false;
        };
        let grid = volume.grid();
        let counts = grid.counts();
        let params = ProbeTraceParams {
            inv_view_proj: camera.inv_view_proj().to_cols_array(),
            camera_pos: camera.position.extend(1.0).to_array(),
            grid_start: grid.start().extend(self.normal_bias).to_array(),
            grid_step: grid.step().extend(CUBE_FACE_FAR).to_array(),
            grid_counts: [counts.x, counts.y, counts.z, self.glossy_steps],
        };
        let buf = shader::write_uniform(device, queue, "probe_trace_params", &params);
        let depth = gbuffer.depth_view();
        let normal = gbuffer.normal_view();
        let views = [
            atlases.irradiance_view(),
            atlases.moments_view(),
            atlases.radiance_view(),
            atlases.distance_view(),
            atlases.low_res_distance_view(),
        ];
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("probe_trace_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&depth) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&normal) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&views[0]) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&views[1]) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(&views[2]) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::TextureView(&views[3]) },
                wgpu::BindGroupEntry { binding: 7, resource: wgpu::BindingResource::TextureView(&views[4]) },
                wgpu::BindGroupEntry { binding: 8, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });
        let diffuse = targets.diffuse.create_view(&Default::default());
        let glossy = targets.glossy.create_view(&Default::default());
        shader::draw_fullscreen_mrt(
            encoder,
            "probe_trace",
            &self.pipeline,
            &bind_group,
            &[
                shader::clear_attachment(&diffuse, wgpu::Color::TRANSPARENT),
                shader::clear_attachment(&glossy, wgpu::Color::TRANSPARENT),
            ],
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light_field::grid::Aabb;
    use approx::assert_relative_eq;

    fn grid() -> ProbeGrid {
        ProbeGrid::new(UVec3::new(2, 2, 2), Aabb::new(Vec3::ZERO, Vec3::splat(3.0)))
    }

    #[test]
    fn chebyshev_is_one_in_front_of_the_mean() {
        assert_eq!(chebyshev(Vec2::new(2.0, 4.0), 1.5), 1.0);
        assert!(chebyshev(Vec2::new(1.0, 1.0), 2.0) < 1e-3);
    }

    #[test]
    fn weights_are_normalised() {
        let g = grid();
        let open = |_: u32, _: Vec3| Vec2::new(100.0, 100.0 * 100.0);
        let w = probe_weights(&g, open, Vec3::new(1.4, 1.7, 1.2), Vec3::Y, DEFAULT_NORMAL_BIAS);
        assert_eq!(w.len(), 8);
        assert_relative_eq!(w.iter().map(|(_, w)| w).sum::<f32>(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn occluded_probe_is_down_weighted() {
        let g = grid();
        // Point in the centre of the cell; normal along +x so probes 0 and 1 differ only in backface.
        let p = Vec3::new(1.5, 1.5, 1.5);
        let open = |_: u32, _: Vec3| Vec2::new(100.0, 100.0 * 100.0);
        let blocked = |i: u32, _: Vec3| if i == 7 { Vec2::new(0.1, 0.01) } else { Vec2::new(100.0, 100.0 * 100.0) };
        let weight_of = |w: &[(u32, f32)], idx: u32| w.iter().filter(|(i, _)| *i == idx).map(|(_, w)| w).sum::<f32>();
        let a = probe_weights(&g, open, p, Vec3::Y, DEFAULT_NORMAL_BIAS);
        let b = probe_weights(&g, blocked, p, Vec3::Y, DEFAULT_NORMAL_BIAS);
        assert!(weight_of(&b, 7) < weight_of(&a, 7) * 0.01);
        assert!(weight_of(&b, 6) > weight_of(&a, 6));
    }

    #[test]
    fn backfacing_probes_weigh_less() {
        let g = grid();
        let p = Vec3::new(1.5, 1.5, 1.5);
        let open = |_: u32, _: Vec3| Vec2::new(100.0, 100.0 * 100.0);
        let w = probe_weights(&g, open, p, Vec3::X, 0.0);
        // Probe 1 sits at +x, probe 0 at -x.
        let w0 = w.iter().find(|(i, _)| *i == 0).map_or(0.0, |(_, w)| *w);
        let w1 = w.iter().find(|(i, _)| *i == 1).map_or(0.0, |(_, w)| *w);
        assert!(w1 > w0 * 2.0);
    }

    #[test]
    fn march_hits_a_spherical_room() {
        let room = |_: Vec3| 2.0;
        let hit = march_probe(room, room, Vec3::ZERO, Vec3::X, 5.0, 64);
        let d = hit.unwrap_or(Vec3::ZERO);
        assert_relative_eq!(d.x, 1.0, epsilon = 1e-4);
        assert!(march_probe(|_| 8.0, |_| 8.0, Vec3::ZERO, Vec3::X, 5.0, 64).is_none());
    }

    #[test]
    fn coarse_miss_skips_refinement() {
        // Low-res says nothing is closer than 8; the fine atlas is never consulted.
        let fine = |_: Vec3| -> f32 { 1.0 };
        let hit = march_probe(fine, |_| 8.0, Vec3::ZERO, Vec3::Y, 5.0, 16);
        assert!(hit.is_none());
    }
}
