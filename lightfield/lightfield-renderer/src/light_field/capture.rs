//! Cube capture of one probe: six 90° faces rendered through the regular G-buffer, shadow
//! visibility and deferred lighting, plus a shading pass for normal and radial distance.

use glam::{Mat4, Vec3};
use wgpu::CommandEncoder;

use crate::camera::{Camera, CUBE_FACE_FAR};
use crate::gbuffer::GBufferPass;
use crate::light_pass::LightPass;
use crate::resources::{GBufferTargets, LIGHT_BUFFER_FORMAT, VISIBILITY_FORMAT};
use crate::scope::PassScope;
use crate::shader;
use crate::shadows::VisibilityPass;

use super::volume::ProbeScene;

const PROBE_SHADING_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/probe_shading.wgsl"));

pub const CUBE_RADIANCE_FORMAT: wgpu::TextureFormat = LIGHT_BUFFER_FORMAT;
pub const CUBE_NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const CUBE_DISTANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProbeShadingParams {
    inv_view_proj: [f32; 16],
    probe: [f32; 4],
}

pub struct ProbeCapture {
    gbuffer_pass: GBufferPass,
    visibility_pass: VisibilityPass,
    light_pass: LightPass,
    shading_pipeline: wgpu::RenderPipeline,
    shading_layout: wgpu::BindGroupLayout,
    gbuffer: GBufferTargets,
    visibility: wgpu::Texture,
    /// Six layers each, one per face.
    radiance: wgpu::Texture,
    normal: wgpu::Texture,
    distance: wgpu::Texture,
    resolution: u32,
}

impl ProbeCapture {
    pub fn new(device: &wgpu::Device, resolution: u32) -> Self {
        let module = shader::create_module(device, "probe_shading_shader", PROBE_SHADING_SHADER);
        let shading_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("probe_shading_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<ProbeShadingParams>() as u64),
                shader::float_texture_entry(1),
                shader::depth_texture_entry(2),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("probe_shading_pipeline_layout"),
            bind_group_layouts: &[&shading_layout],
            push_constant_ranges: &[],
        });
        let shading_pipeline = shader::fullscreen_pipeline(
            device,
            "probe_shading_pipeline",
            &module,
            &layout,
            "fs",
            &[
                Some(wgpu::ColorTargetState::from(CUBE_NORMAL_FORMAT)),
                Some(wgpu::ColorTargetState::from(CUBE_DISTANCE_FORMAT)),
            ],
        );
        log::info!("probe capture: allocating {} cube faces", resolution);
        Self {
            gbuffer_pass: GBufferPass::new(device, None),
            visibility_pass: VisibilityPass::new(device),
            light_pass: LightPass::new(device),
            shading_pipeline,
            shading_layout,
            gbuffer: GBufferTargets::new(device, resolution, resolution),
            visibility: shader::render_target(device, "probe_visibility", resolution, resolution, 1, VISIBILITY_FORMAT),
            radiance: shader::render_target(device, "probe_cube_radiance", resolution, resolution, 6, CUBE_RADIANCE_FORMAT),
            normal: shader::render_target(device, "probe_cube_normal", resolution, resolution, 6, CUBE_NORMAL_FORMAT),
            distance: shader::render_target(device, "probe_cube_distance", resolution, resolution, 6, CUBE_DISTANCE_FORMAT),
            resolution,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn radiance_view(&self) -> wgpu::TextureView {
        shader::array_view(&self.radiance)
    }

    pub fn normal_view(&self) -> wgpu::TextureView {
        shader::array_view(&self.normal)
    }

    pub fn distance_view(&self) -> wgpu::TextureView {
        shader::array_view(&self.distance)
    }

    /// Render all six faces around `position` into the cube arrays.
    pub fn capture(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        position: Vec3,
        scene: &ProbeScene,
    ) {
        let visibility = self.visibility.create_view(&Default::default());
        let depth = self.gbuffer.depth_view();
        let normal = self.gbuffer.normal_view();
        for face in 0..6 {
            let mut scope = PassScope::new(encoder, "probe_face");
            let camera = Camera::cube_face(position, face);
            self.gbuffer_pass.encode(&mut scope, device, queue, &self.gbuffer, scene.meshes, &camera, Mat4::IDENTITY, false);
            self.visibility_pass.encode(&mut scope, device, queue, &camera, &depth, scene.shadow.as_ref(), &visibility);

            let layer = face as u32;
            let radiance = shader::layer_view(&self.radiance, layer);
            self.light_pass.encode(&mut scope, device, queue, &self.gbuffer, &visibility, &camera, scene.lights, &radiance);

            let params = ProbeShadingParams {
                inv_view_proj: camera.inv_view_proj().to_cols_array(),
                probe: position.extend(CUBE_FACE_FAR).to_array(),
            };
            let buf = shader::write_uniform(device, queue, "probe_shading_params", &params);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("probe_shading_bind_group"),
                layout: &self.shading_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&normal) },
                    wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&depth) },
                ],
            });
            let normal_layer = shader::layer_view(&self.normal, layer);
            let distance_layer = shader::layer_view(&self.distance, layer);
            shader::draw_fullscreen_mrt(
                &mut scope,
                "probe_shading",
                &self.shading_pipeline,
                &bind_group,
                &[
                    shader::clear_attachment(&normal_layer, wgpu::Color::TRANSPARENT),
                    shader::clear_attachment(&distance_layer, wgpu::Color::TRANSPARENT),
                ],
            );
        }
    }
}
