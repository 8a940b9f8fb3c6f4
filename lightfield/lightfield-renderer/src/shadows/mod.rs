//! Directional shadow map (single cascade fitted to the scene bounds) and the screen-space
//! visibility pass that turns a depth buffer + shadow map into an R8Unorm mask.

use glam::{Mat4, Vec3};
use wgpu::CommandEncoder;

use crate::camera::Camera;
use crate::gbuffer::{vertex_layout, MeshDraw};
use crate::resources::{DEPTH_FORMAT, VISIBILITY_FORMAT};
use crate::shader;

const SHADOW_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shadow.wgsl"));
const VISIBILITY_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/visibility.wgsl"));

/// Orthographic light view-projection enclosing the AABB `[min, max]`, looking along `direction`.
pub fn light_view_proj(direction: Vec3, min: Vec3, max: Vec3) -> Mat4 {
    let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let center = (min + max) * 0.5;
    let radius = ((max - min).length() * 0.5).max(1e-3);
    let eye = center - dir * radius * 2.0;
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_at_rh(eye, center, up);
    let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 4.0);
    proj * view
}

pub struct ShadowPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    shadow_map: wgpu::Texture,
    resolution: u32,
}

impl ShadowPass {
    pub fn new(device: &wgpu::Device, resolution: u32) -> Self {
        let shader = shader::create_module(device, "shadow_shader", SHADOW_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::VERTEX, 64),
                shader::uniform_entry(1, wgpu::ShaderStages::VERTEX, 64),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState { constant: 2, slope_scale: 2.0, clamp: 0.0 },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let shadow_map = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow_map"),
            size: wgpu::Extent3d { width: resolution, height: resolution, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self { pipeline, bind_group_layout, shadow_map, resolution }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn shadow_map_view(&self) -> wgpu::TextureView {
        self.shadow_map.create_view(&Default::default())
    }

    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        meshes: &[MeshDraw],
        light_view_proj: &Mat4,
    ) {
        let view_proj_buf = shader::write_uniform(device, queue, "shadow_view_proj", &light_view_proj.to_cols_array());
        let shadow_view = self.shadow_map_view();
        let bind_groups: Vec<wgpu::BindGroup> = meshes
            .iter()
            .map(|mesh| {
                let model_buf = shader::write_uniform(device, queue, "shadow_model", &mesh.transform);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("shadow_bind_group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: view_proj_buf.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: model_buf.as_entire_binding() },
                    ],
                })
            })
            .collect();
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shadow_pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &shadow_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.pipeline);
        for (mesh, bg) in meshes.iter().zip(&bind_groups) {
            rp.set_bind_group(0, bg, &[]);
            rp.set_vertex_buffer(0, mesh.vertex_buf.slice(..));
            rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
            rp.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct VisibilityParams {
    inv_view_proj: [f32; 16],
    light_view_proj: [f32; 16],
    shadow_texel: [f32; 2],
    bias: f32,
    _pad: f32,
}

/// Shadow-map lookup for a light, if one is active this frame.
pub struct ShadowInput<'a> {
    pub shadow_map: &'a wgpu::TextureView,
    pub light_view_proj: Mat4,
    pub resolution: u32,
}

pub struct VisibilityPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    bias: f32,
}

impl VisibilityPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "visibility_shader", VISIBILITY_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("visibility_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<VisibilityParams>() as u64),
                shader::depth_texture_entry(1),
                shader::depth_texture_entry(2),
                shader::sampler_entry(3, wgpu::SamplerBindingType::Comparison),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("visibility_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "visibility_pipeline",
            &module,
            &layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(VISIBILITY_FORMAT))],
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_compare_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        Self { pipeline, bind_group_layout, sampler, bias: 0.002 }
    }

    /// Write visibility for `depth` (seen by `camera`) into `target`. Without a shadow input
    /// the target is cleared to fully lit.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        depth: &wgpu::TextureView,
        shadow: Option<&ShadowInput>,
        target: &wgpu::TextureView,
    ) {
        let Some(shadow) = shadow else {
            let rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("visibility_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::WHITE), store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            drop(rp);
            return;
        };
        let params = VisibilityParams {
            inv_view_proj: camera.inv_view_proj().to_cols_array(),
            light_view_proj: shadow.light_view_proj.to_cols_array(),
            shadow_texel: [1.0 / shadow.resolution as f32; 2],
            bias: self.bias,
            _pad: 0.0,
        };
        let buf = shader::write_uniform(device, queue, "visibility_params", &params);
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("visibility_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(depth) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(shadow.shadow_map) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });
        shader::draw_fullscreen(encoder, "visibility_pass", &self.pipeline, &bg, target, wgpu::LoadOp::Clear(wgpu::Color::WHITE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn assert_inside(m: &Mat4, p: Vec3) {
        let c = *m * Vec4::new(p.x, p.y, p.z, 1.0);
        let n = c.truncate() / c.w;
        assert!(n.x.abs() <= 1.0 + 1e-5 && n.y.abs() <= 1.0 + 1e-5, "{p:?} -> {n:?}");
        assert!((-1e-5..=1.0 + 1e-5).contains(&n.z), "{p:?} -> {n:?}");
    }

    #[test]
    fn light_frustum_contains_scene_bounds() {
        let min = Vec3::new(-3.0, 0.0, -2.0);
        let max = Vec3::new(5.0, 4.0, 6.0);
        for dir in [Vec3::new(-0.3, -1.0, -0.2), Vec3::NEG_Y, Vec3::new(1.0, -0.1, 0.0)] {
            let m = light_view_proj(dir, min, max);
            for i in 0..8 {
                let corner = Vec3::new(
                    if i & 1 == 0 { min.x } else { max.x },
                    if i & 2 == 0 { min.y } else { max.y },
                    if i & 4 == 0 { min.z } else { max.z },
                );
                assert_inside(&m, corner);
            }
        }
    }

    #[test]
    fn nearer_to_light_means_smaller_depth() {
        let m = light_view_proj(Vec3::NEG_Y, Vec3::splat(-1.0), Vec3::splat(1.0));
        let top = m * Vec4::new(0.0, 1.0, 0.0, 1.0);
        let bottom = m * Vec4::new(0.0, -1.0, 0.0, 1.0);
        assert!(top.z / top.w < bottom.z / bottom.w);
    }
}
