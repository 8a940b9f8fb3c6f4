//! G-buffer pass: surface channels + depth, then a second raster of the same draws for
//! motion vectors, linear z and compact normal-depth (depth test only, no depth write).

use std::sync::Arc;

use glam::Mat4;
use wgpu::CommandEncoder;

use crate::camera::Camera;
use crate::resources::{GBufferTargets, DEPTH_FORMAT, MOTION_FORMATS, SURFACE_FORMATS};
use crate::shader;

const GBUFFER_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/gbuffer.wgsl"));

/// Constant material written into the surface channels.
#[derive(Clone, Copy, Debug)]
pub struct MaterialParams {
    pub base_color: [f32; 4],
    pub specular: [f32; 3],
    pub roughness: f32,
    pub emissive: [f32; 3],
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self { base_color: [0.8, 0.8, 0.8, 1.0], specular: [0.04; 3], roughness: 0.5, emissive: [0.0; 3] }
    }
}

#[derive(Clone)]
pub struct MeshDraw {
    pub vertex_buf: Arc<wgpu::Buffer>,
    pub index_buf: Arc<wgpu::Buffer>,
    pub index_count: u32,
    /// World transform (column-major 4x4).
    pub transform: [f32; 16],
    /// Last frame's world transform; equal to `transform` for static meshes.
    pub prev_transform: [f32; 16],
    pub material: MaterialParams,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewUniform {
    view_proj: [f32; 16],
    prev_view_proj: [f32; 16],
    view: [f32; 16],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ObjectUniform {
    model: [f32; 16],
    prev_model: [f32; 16],
    normal_matrix: [f32; 16],
    base_color: [f32; 4],
    specular_roughness: [f32; 4],
    emissive: [f32; 4],
}

impl ObjectUniform {
    fn new(transform: [f32; 16], prev_transform: [f32; 16], m: &MaterialParams) -> Self {
        let model = Mat4::from_cols_array(&transform);
        Self {
            model: transform,
            prev_model: prev_transform,
            normal_matrix: model.inverse().transpose().to_cols_array(),
            base_color: m.base_color,
            specular_roughness: [m.specular[0], m.specular[1], m.specular[2], m.roughness],
            emissive: [m.emissive[0], m.emissive[1], m.emissive[2], 0.0],
        }
    }
}

/// Vertex layout shared with the shadow pass: position, normal, uv (32 bytes).
pub const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
    wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
    wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
    wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x2 },
];

pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: 32,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

pub struct GBufferPass {
    surface_pipeline: wgpu::RenderPipeline,
    motion_pipeline: wgpu::RenderPipeline,
    view_layout: wgpu::BindGroupLayout,
    object_layout: wgpu::BindGroupLayout,
}

impl GBufferPass {
    /// `cull_mode` is `Some(Back)` for the main view and `None` for probe faces.
    pub fn new(device: &wgpu::Device, cull_mode: Option<wgpu::Face>) -> Self {
        let shader = shader::create_module(device, "gbuffer_shader", GBUFFER_SHADER);
        let vs_fs = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gbuffer_view_layout"),
            entries: &[shader::uniform_entry(0, vs_fs, std::mem::size_of::<ViewUniform>() as u64)],
        });
        let object_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gbuffer_object_layout"),
            entries: &[shader::uniform_entry(0, vs_fs, std::mem::size_of::<ObjectUniform>() as u64)],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("gbuffer_pipeline_layout"),
            bind_group_layouts: &[&view_layout, &object_layout],
            push_constant_ranges: &[],
        });
        let primitive = wgpu::PrimitiveState { cull_mode, ..Default::default() };

        let surface_targets = SURFACE_FORMATS.map(|f| Some(wgpu::ColorTargetState::from(f)));
        let surface_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("gbuffer_surface_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_surface"),
                targets: &surface_targets,
                compilation_options: Default::default(),
            }),
            primitive,
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let motion_targets = MOTION_FORMATS.map(|f| Some(wgpu::ColorTargetState::from(f)));
        let motion_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("gbuffer_motion_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[vertex_layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_motion"),
                targets: &motion_targets,
                compilation_options: Default::default(),
            }),
            primitive,
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

        Self { surface_pipeline, motion_pipeline, view_layout, object_layout }
    }

    /// Fill `targets`. The motion channels are only written when `with_motion` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &GBufferTargets,
        meshes: &[MeshDraw],
        camera: &Camera,
        prev_view_proj: Mat4,
        with_motion: bool,
    ) {
        let view_uniform = ViewUniform {
            view_proj: camera.view_proj().to_cols_array(),
            prev_view_proj: prev_view_proj.to_cols_array(),
            view: camera.view.to_cols_array(),
        };
        let view_buf = shader::write_uniform(device, queue, "gbuffer_view", &view_uniform);
        let view_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gbuffer_view_bind_group"),
            layout: &self.view_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: view_buf.as_entire_binding() }],
        });
        let object_bgs: Vec<wgpu::BindGroup> = meshes
            .iter()
            .map(|mesh| {
                let buf = shader::write_uniform(device, queue, "gbuffer_object", &ObjectUniform::new(mesh.transform, mesh.prev_transform, &mesh.material));
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("gbuffer_object_bind_group"),
                    layout: &self.object_layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() }],
                })
            })
            .collect();

        let diffuse_opacity = targets.diffuse_opacity_view();
        let specular_roughness = targets.specular_roughness_view();
        let emissive = targets.emissive_view();
        let normal = targets.normal_view();
        let depth_view = targets.depth_view();
        {
            let clear = wgpu::Color::TRANSPARENT;
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gbuffer_surface_pass"),
                color_attachments: &[
                    shader::clear_attachment(&diffuse_opacity, clear),
                    shader::clear_attachment(&specular_roughness, clear),
                    shader::clear_attachment(&emissive, clear),
                    shader::clear_attachment(&normal, clear),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&self.surface_pipeline);
            rp.set_bind_group(0, &view_bg, &[]);
            for (mesh, bg) in meshes.iter().zip(&object_bgs) {
                rp.set_bind_group(1, bg, &[]);
                rp.set_vertex_buffer(0, mesh.vertex_buf.slice(..));
                rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rp.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
        if !with_motion {
            return;
        }

        let motion = targets.motion_view();
        let linear_z = targets.linear_z_view();
        let compact = targets.compact_normal_depth_view();
        // Background keeps zero motion and a far linear z so SVGF rejects it.
        let far = wgpu::Color { r: camera.far as f64, g: 0.0, b: 0.0, a: 0.0 };
        let far_nd = wgpu::Color { r: 0.5, g: 0.5, b: camera.far as f64, a: 0.0 };
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("gbuffer_motion_pass"),
            color_attachments: &[
                shader::clear_attachment(&motion, wgpu::Color::TRANSPARENT),
                shader::clear_attachment(&linear_z, far),
                shader::clear_attachment(&compact, far_nd),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(&self.motion_pipeline);
        rp.set_bind_group(0, &view_bg, &[]);
        for (mesh, bg) in meshes.iter().zip(&object_bgs) {
            rp.set_bind_group(1, bg, &[]);
            rp.set_vertex_buffer(0, mesh.vertex_buf.slice(..));
            rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
            rp.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn object_uniform_layout_is_std140_friendly() {
        assert_eq!(std::mem::size_of::<ObjectUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<ViewUniform>() % 16, 0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(glam::Vec3::new(2.0, 1.0, 1.0)).to_cols_array();
        let material = MaterialParams { roughness: 0.25, ..Default::default() };
        let u = ObjectUniform::new(model, model, &material);
        let n = Mat4::from_cols_array(&u.normal_matrix);
        // A 45° normal in the xy plane leans towards y once x is stretched.
        let normal = n.transform_vector3(glam::Vec3::new(1.0, 1.0, 0.0).normalize()).normalize();
        assert!(normal.y > normal.x);
        assert_relative_eq!(u.specular_roughness[3], 0.25);
        assert_relative_eq!(u.emissive[3], 0.0);
    }
}
