//! Probe viewer: visible probes drawn as impostor spheres over the lit frame.

use glam::{Vec3, Vec4};
use wgpu::CommandEncoder;

use crate::camera::Camera;
use crate::resources::{DEPTH_FORMAT, LIGHT_BUFFER_FORMAT};
use crate::shader;

use super::grid::ProbeGrid;
use super::volume::LightFieldProbeVolume;
use super::ProbeDebugMode;

const PROBE_DEBUG_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/probe_debug.wgsl"));

/// Stable per-probe hue, matching `probe_color` in the shader.
pub fn probe_color(index: u32) -> Vec3 {
    let h = (index as f32 * 0.618_034).fract();
    let k = Vec3::new(h, h + 2.0 / 3.0, h + 1.0 / 3.0);
    let f = |x: f32| ((x.fract() * 6.0 - 3.0).abs() - 1.0).clamp(0.0, 1.0);
    Vec3::new(f(k.x), f(k.y), f(k.z))
}

/// Instance data `(x, y, z, flat index)` for every visible probe.
pub fn visible_instances(grid: &ProbeGrid) -> Vec<Vec4> {
    grid.probes()
        .iter()
        .filter(|p| p.visible)
        .map(|p| p.position.extend(p.index as f32))
        .collect()
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProbeDebugParams {
    view_proj: [f32; 16],
    camera_pos: [f32; 4],
    camera_right: [f32; 4],
    camera_up: [f32; 4],
    mode: u32,
    _pad: [u32; 3],
}

pub struct ProbeDebugPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl ProbeDebugPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "probe_debug_shader", PROBE_DEBUG_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("probe_debug_bind_group_layout"),
            entries: &[
                shader::uniform_entry(
                    0,
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    std::mem::size_of::<ProbeDebugParams>() as u64,
                ),
                shader::array_texture_entry(1),
                shader::array_texture_entry(2),
                shader::sampler_entry(3, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("probe_debug_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("probe_debug_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 16,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &[wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x4 }],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState::from(LIGHT_BUFFER_FORMAT))],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        Self { pipeline, bind_group_layout, sampler: shader::linear_clamp_sampler(device, "probe_debug_sampler") }
    }

    /// Draw visible probes of `volume` into `target`, depth-tested against the scene `depth`.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        volume: &LightFieldProbeVolume,
        mode: ProbeDebugMode,
        depth: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        let Some(atlases) = volume.atlases() else {
            return;
        };
        let instances = visible_instances(volume.grid());
        if instances.is_empty() {
            return;
        }
        let instance_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("probe_debug_instances"),
            size: (instances.len() * std::mem::size_of::<Vec4>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&instance_buf, 0, bytemuck::cast_slice(&instances));

        let inv_view = camera.view.inverse();
        let params = ProbeDebugParams {
            view_proj: camera.view_proj().to_cols_array(),
            camera_pos: camera.position.extend(volume.probe_size()).to_array(),
            camera_right: inv_view.x_axis.truncate().normalize_or_zero().extend(0.0).to_array(),
            camera_up: inv_view.y_axis.truncate().normalize_or_zero().extend(0.0).to_array(),
            mode: mode.code(),
            _pad: [0; 3],
        };
        let buf = shader::write_uniform(device, queue, "probe_debug_params", &params);
        let radiance = atlases.radiance_view();
        let irradiance = atlases.irradiance_view();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("probe_debug_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&radiance) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&irradiance) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("probe_debug_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipeline);
        rp.set_bind_group(0, &bind_group, &[]);
        rp.set_vertex_buffer(0, instance_buf.slice(..));
        rp.draw(0..6, 0..instances.len() as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light_field::grid::Aabb;
    use glam::UVec3;

    #[test]
    fn probe_colors_are_distinct_and_in_range() {
        let colors: Vec<Vec3> = (0..8).map(probe_color).collect();
        for c in &colors {
            assert!(c.min_element() >= 0.0 && c.max_element() <= 1.0);
        }
        for i in 0..colors.len() {
            for j in i + 1..colors.len() {
                assert!((colors[i] - colors[j]).length() > 0.05, "{i} vs {j}");
            }
        }
    }

    #[test]
    fn only_visible_probes_are_instanced() {
        let mut grid = ProbeGrid::new(UVec3::new(4, 1, 1), Aabb::new(Vec3::ZERO, Vec3::splat(5.0)));
        assert!(visible_instances(&grid).is_empty());
        grid.set_visible(2, true);
        let inst = visible_instances(&grid);
        assert_eq!(inst.len(), 1);
        assert_eq!(inst[0].w, 2.0);
        assert_eq!(inst[0].truncate(), grid.probe(2).map(|p| p.position).unwrap_or_default());
    }
}
