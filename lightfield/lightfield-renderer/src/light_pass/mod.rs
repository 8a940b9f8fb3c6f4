//! Light pass: fullscreen emissive/sky, directional (with shadow visibility), point and spot lights.

use glam::Vec3;
use wgpu::CommandEncoder;

use render_api::{PointLight, SpotLight};

use crate::camera::Camera;
use crate::resources::{GBufferTargets, LIGHT_BUFFER_FORMAT};
use crate::shader;

const LIGHTS_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/lights.wgsl"));

#[derive(Clone, Copy, Debug)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
}

/// Lights for one view. Shared by the main view and probe cube faces.
#[derive(Clone, Debug, Default)]
pub struct SceneLights {
    pub directional: Option<DirectionalLight>,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
    pub sky_color: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct LightUniform {
    inv_view_proj: [f32; 16],
    camera_pos: [f32; 4],
    position: [f32; 4],
    direction: [f32; 4],
    color: [f32; 4],
    /// radius, falloff exponent, inner cos, outer cos
    params: [f32; 4],
}

pub struct LightPass {
    ambient_pipeline: wgpu::RenderPipeline,
    directional_pipeline: wgpu::RenderPipeline,
    point_pipeline: wgpu::RenderPipeline,
    spot_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl LightPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader::create_module(device, "lights_shader", LIGHTS_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("light_pass_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<LightUniform>() as u64),
                shader::float_texture_entry(1),
                shader::float_texture_entry(2),
                shader::float_texture_entry(3),
                shader::float_texture_entry(4),
                shader::depth_texture_entry(5),
                shader::float_texture_entry(6),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("light_pass_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let targets = [Some(wgpu::ColorTargetState {
            format: LIGHT_BUFFER_FORMAT,
            blend: Some(shader::additive_blend()),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let pipeline = |label: &str, entry: &str| shader::fullscreen_pipeline(device, label, &module, &layout, entry, &targets);
        Self {
            ambient_pipeline: pipeline("light_pass_ambient_pipeline", "fs_ambient"),
            directional_pipeline: pipeline("light_pass_pipeline", "fs_directional"),
            point_pipeline: pipeline("light_pass_point_pipeline", "fs_point"),
            spot_pipeline: pipeline("light_pass_spot_pipeline", "fs_spot"),
            bind_group_layout,
        }
    }

    /// Clear `target` and accumulate every light of `lights` into it.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        gbuffer: &GBufferTargets,
        visibility: &wgpu::TextureView,
        camera: &Camera,
        lights: &SceneLights,
        target: &wgpu::TextureView,
    ) {
        let base = LightUniform {
            inv_view_proj: camera.inv_view_proj().to_cols_array(),
            camera_pos: camera.position.extend(1.0).to_array(),
            ..Default::default()
        };
        let views = [
            gbuffer.diffuse_opacity_view(),
            gbuffer.specular_roughness_view(),
            gbuffer.normal_view(),
            gbuffer.emissive_view(),
            gbuffer.depth_view(),
        ];

        let ambient = LightUniform { color: [lights.sky_color[0], lights.sky_color[1], lights.sky_color[2], 0.0], ..base };
        self.draw(encoder, device, queue, &views, visibility, &ambient, &self.ambient_pipeline, target, wgpu::LoadOp::Clear(wgpu::Color::BLACK));

        if let Some(dir) = &lights.directional {
            let u = LightUniform {
                direction: dir.direction.extend(0.0).to_array(),
                color: dir.color.extend(0.0).to_array(),
                ..base
            };
            self.draw(encoder, device, queue, &views, visibility, &u, &self.directional_pipeline, target, wgpu::LoadOp::Load);
        }
        for light in &lights.point_lights {
            let u = LightUniform {
                position: [light.position[0], light.position[1], light.position[2], 1.0],
                color: [light.color[0], light.color[1], light.color[2], 0.0],
                params: [light.radius, light.falloff_exponent, 0.0, 0.0],
                ..base
            };
            self.draw(encoder, device, queue, &views, visibility, &u, &self.point_pipeline, target, wgpu::LoadOp::Load);
        }
        for light in &lights.spot_lights {
            let u = LightUniform {
                position: [light.position[0], light.position[1], light.position[2], 1.0],
                direction: [light.direction[0], light.direction[1], light.direction[2], 0.0],
                color: [light.color[0], light.color[1], light.color[2], 0.0],
                params: [light.radius, 2.0, light.inner_angle.cos(), light.outer_angle.cos()],
                ..base
            };
            self.draw(encoder, device, queue, &views, visibility, &u, &self.spot_pipeline, target, wgpu::LoadOp::Load);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw(
        &self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        views: &[wgpu::TextureView; 5],
        visibility: &wgpu::TextureView,
        uniform: &LightUniform,
        pipeline: &wgpu::RenderPipeline,
        target: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        let buf = shader::write_uniform(device, queue, "light_uniform", uniform);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("light_pass_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&views[0]) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&views[1]) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&views[2]) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&views[3]) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(&views[4]) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::TextureView(visibility) },
            ],
        });
        shader::draw_fullscreen(encoder, "light_pass", pipeline, &bind_group, target, load);
    }
}
