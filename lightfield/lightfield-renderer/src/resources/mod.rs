//! Frame resources: G-buffer (surface + motion channels), depth, shadow visibility, light buffer, HZB.

use wgpu::TextureView;

use crate::error::{RenderError, RenderResult};
use crate::hzb::HzbTexture;
use crate::shader::render_target;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const LIGHT_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const VISIBILITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Surface pass formats, in attachment order.
pub const SURFACE_FORMATS: [wgpu::TextureFormat; 4] = [
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Rgba16Float,
];

/// Motion pass formats, in attachment order.
pub const MOTION_FORMATS: [wgpu::TextureFormat; 3] = [
    wgpu::TextureFormat::Rg16Float,
    wgpu::TextureFormat::Rg16Float,
    wgpu::TextureFormat::Rgba16Float,
];

/// G-buffer channels. Also allocated at cube-face size by probe capture.
pub struct GBufferTargets {
    /// rgb albedo, a opacity.
    pub diffuse_opacity: wgpu::Texture,
    /// rgb specular reflectance, a roughness.
    pub specular_roughness: wgpu::Texture,
    pub emissive: wgpu::Texture,
    /// World-space normal, xyz.
    pub normal: wgpu::Texture,
    pub depth: wgpu::Texture,
    /// Current uv minus previous uv.
    pub motion: wgpu::Texture,
    /// (view depth, screen-space derivative).
    pub linear_z: wgpu::Texture,
    /// (octahedral normal xy, view depth, derivative).
    pub compact_normal_depth: wgpu::Texture,
    width: u32,
    height: u32,
}

impl GBufferTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gbuffer_depth"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self {
            diffuse_opacity: render_target(device, "gbuffer_diffuse_opacity", width, height, 1, SURFACE_FORMATS[0]),
            specular_roughness: render_target(device, "gbuffer_specular_roughness", width, height, 1, SURFACE_FORMATS[1]),
            emissive: render_target(device, "gbuffer_emissive", width, height, 1, SURFACE_FORMATS[2]),
            normal: render_target(device, "gbuffer_normal", width, height, 1, SURFACE_FORMATS[3]),
            depth,
            motion: render_target(device, "gbuffer_motion", width, height, 1, MOTION_FORMATS[0]),
            linear_z: render_target(device, "gbuffer_linear_z", width, height, 1, MOTION_FORMATS[1]),
            compact_normal_depth: render_target(device, "gbuffer_compact_normal_depth", width, height, 1, MOTION_FORMATS[2]),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn diffuse_opacity_view(&self) -> TextureView { self.diffuse_opacity.create_view(&Default::default()) }
    pub fn specular_roughness_view(&self) -> TextureView { self.specular_roughness.create_view(&Default::default()) }
    pub fn emissive_view(&self) -> TextureView { self.emissive.create_view(&Default::default()) }
    pub fn normal_view(&self) -> TextureView { self.normal.create_view(&Default::default()) }
    pub fn depth_view(&self) -> TextureView { self.depth.create_view(&Default::default()) }
    pub fn motion_view(&self) -> TextureView { self.motion.create_view(&Default::default()) }
    pub fn linear_z_view(&self) -> TextureView { self.linear_z.create_view(&Default::default()) }
    pub fn compact_normal_depth_view(&self) -> TextureView { self.compact_normal_depth.create_view(&Default::default()) }
}

pub struct FrameResources {
    pub gbuffer: GBufferTargets,
    pub visibility: wgpu::Texture,
    pub light_buffer: wgpu::Texture,
    pub hzb: HzbTexture,
    width: u32,
    height: u32,
}

impl FrameResources {
    /// Returns `existing` when the size matches, otherwise reallocates every size-dependent target.
    pub fn ensure_size(device: &wgpu::Device, existing: Option<Self>, width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::ZeroSized { width, height });
        }
        if let Some(r) = existing {
            if r.width == width && r.height == height {
                return Ok(r);
            }
        }
        log::info!("frame resources: allocating {}x{}", width, height);
        Ok(Self {
            gbuffer: GBufferTargets::new(device, width, height),
            visibility: render_target(device, "shadow_visibility", width, height, 1, VISIBILITY_FORMAT),
            light_buffer: render_target(device, "light_buffer", width, height, 1, LIGHT_BUFFER_FORMAT),
            hzb: HzbTexture::new(device, width, height),
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn visibility_view(&self) -> TextureView { self.visibility.create_view(&Default::default()) }
    pub fn light_buffer_view(&self) -> TextureView { self.light_buffer.create_view(&Default::default()) }
}
