//! Screen-space reflections over the HZB.
//!
//! Each `execute` traces into a scratch target, runs temporal accumulation against the
//! single history texture into `target`, then copies `target` back into history.

pub mod trace;

use glam::Mat4;
use wgpu::CommandEncoder;

use crate::camera::Camera;
use crate::hzb::{next_pow2, HzbTexture};
use crate::shader;
use crate::temporal::{TemporalAccumulation, DEFAULT_ALPHA};

const SSR_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/ssr.wgsl"));

pub const SSR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Entry 0 is a header, the rest one `vec4` per march step.
pub const RAY_PATH_CAPACITY: u64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SsrDebugMode {
    #[default]
    None,
    /// Green for hits, red for misses.
    IntersectionResult,
    /// Steps taken, normalised by the combined step budget.
    RaymarchCount,
    /// Record every step of the ray through `pixel` into the ray-path buffer.
    RayPath { pixel: [u32; 2] },
}

impl SsrDebugMode {
    fn code(self) -> u32 {
        match self {
            SsrDebugMode::None => 0,
            SsrDebugMode::IntersectionResult => 1,
            SsrDebugMode::RaymarchCount => 2,
            SsrDebugMode::RayPath { .. } => 3,
        }
    }

    fn pixel(self) -> [u32; 2] {
        match self {
            SsrDebugMode::RayPath { pixel } => pixel,
            _ => [0, 0],
        }
    }
}

#[derive(Clone, Debug)]
pub struct SsrSettings {
    /// Depth span behind a surface that still counts as a hit (view units).
    pub thickness: f32,
    /// Pixels per DDA step along the major axis.
    pub stride: f32,
    /// Scale of the per-pixel start offset, in strides.
    pub jitter_fraction: f32,
    pub max_distance: f32,
    pub max_steps_hzb: u32,
    pub max_steps_dda: u32,
    /// Walk the HZB before the DDA.
    pub hiz_ray_trace: bool,
    pub temporal_alpha: f32,
    pub debug_mode: SsrDebugMode,
}

impl Default for SsrSettings {
    fn default() -> Self {
        Self {
            thickness: 0.05,
            stride: 1.0,
            jitter_fraction: 1.0,
            max_distance: 100.0,
            max_steps_hzb: 64,
            max_steps_dda: 2048,
            hiz_ray_trace: true,
            temporal_alpha: DEFAULT_ALPHA,
            debug_mode: SsrDebugMode::None,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SsrConstants {
    inv_proj: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    proj_to_pixel: [[f32; 4]; 4],
    depth_params: [f32; 4],
    depth_size: [f32; 2],
    hzb_size: [f32; 2],
    near_z: f32,
    far_z: f32,
    thickness: f32,
    stride: f32,
    jitter: f32,
    max_distance: f32,
    max_steps_hzb: u32,
    max_steps_dda: u32,
    hiz: u32,
    frame: u32,
    hzb_mip_count: u32,
    debug_mode: u32,
    debug_pixel: [u32; 2],
    _pad: [u32; 2],
}

/// Per-frame inputs. `color` is the lit frame the reflections sample.
pub struct SsrInputs<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
    pub hzb: &'a HzbTexture,
    pub normal: &'a wgpu::TextureView,
    pub diffuse_opacity: &'a wgpu::TextureView,
    pub specular_roughness: &'a wgpu::TextureView,
    pub motion: &'a wgpu::TextureView,
}

struct SsrTargets {
    trace: wgpu::Texture,
    history: wgpu::Texture,
    width: u32,
    height: u32,
}

pub struct SsrPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    temporal: TemporalAccumulation,
    settings: SsrSettings,
    targets: Option<SsrTargets>,
    history_valid: bool,
    frame_count: u64,
    ray_path: Option<wgpu::Buffer>,
    ray_path_placeholder: wgpu::Buffer,
}

impl SsrPass {
    pub fn new(device: &wgpu::Device, settings: SsrSettings) -> Self {
        let module = shader::create_module(device, "ssr_shader", SSR_SHADER);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ssr_bind_group_layout"),
            entries: &[
                shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<SsrConstants>() as u64),
                shader::float_texture_entry(1),
                shader::depth_texture_entry(2),
                shader::unfilterable_texture_entry(3),
                shader::float_texture_entry(4),
                shader::float_texture_entry(5),
                shader::float_texture_entry(6),
                shader::storage_entry(7, 16),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ssr_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = shader::fullscreen_pipeline(
            device,
            "ssr_pipeline",
            &module,
            &layout,
            "fs",
            &[Some(wgpu::ColorTargetState::from(SSR_FORMAT))],
        );
        let ray_path_placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ssr_ray_path_placeholder"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            bind_group_layout,
            temporal: TemporalAccumulation::new(device, SSR_FORMAT),
            settings,
            targets: None,
            history_valid: false,
            frame_count: 0,
            ray_path: None,
            ray_path_placeholder,
        }
    }

    pub fn settings(&self) -> &SsrSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SsrSettings {
        &mut self.settings
    }

    pub fn set_thickness(&mut self, thickness: f32) {
        self.settings.thickness = thickness;
    }

    pub fn set_stride(&mut self, stride: f32) {
        self.settings.stride = stride.max(1.0);
    }

    pub fn set_max_distance(&mut self, max_distance: f32) {
        self.settings.max_distance = max_distance;
    }

    pub fn set_max_steps(&mut self, hzb: u32, dda: u32) {
        self.settings.max_steps_hzb = hzb;
        self.settings.max_steps_dda = dda;
    }

    pub fn set_hiz_ray_trace(&mut self, enabled: bool) {
        self.settings.hiz_ray_trace = enabled;
    }

    pub fn set_debug_mode(&mut self, mode: SsrDebugMode) {
        self.settings.debug_mode = mode;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Drop accumulated history; the next frame passes the trace through.
    pub fn invalidate_history(&mut self) {
        self.history_valid = false;
    }

    /// Ray-path storage (`RAY_PATH_CAPACITY` x `vec4<f32>`), allocated the first time
    /// `SsrDebugMode::RayPath` is used. Usable as a copy source for readback.
    pub fn ray_path_buffer(&self) -> Option<&wgpu::Buffer> {
        self.ray_path.as_ref()
    }

    fn ensure_targets(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if matches!(&self.targets, Some(t) if t.width == width && t.height == height) {
            return;
        }
        log::info!("ssr: allocating {}x{} trace/history targets", width, height);
        self.targets = Some(SsrTargets {
            trace: shader::render_target(device, "ssr_trace", width, height, 1, SSR_FORMAT),
            history: shader::render_target(device, "ssr_history", width, height, 1, SSR_FORMAT),
            width,
            height,
        });
        self.history_valid = false;
    }

    fn ensure_ray_path(&mut self, device: &wgpu::Device) {
        if self.ray_path.is_some() || !matches!(self.settings.debug_mode, SsrDebugMode::RayPath { .. }) {
            return;
        }
        log::info!("ssr: allocating ray-path debug buffer ({} entries)", RAY_PATH_CAPACITY);
        self.ray_path = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ssr_ray_path"),
            size: RAY_PATH_CAPACITY * 16,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }));
    }

    fn constants(&self, camera: &Camera, width: u32, height: u32, hzb: &HzbTexture) -> SsrConstants {
        let s = &self.settings;
        let to_pixel: Mat4 = trace::proj_to_pixel(camera.proj, width as f32, height as f32);
        SsrConstants {
            inv_proj: camera.inv_proj().to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            proj_to_pixel: to_pixel.to_cols_array_2d(),
            depth_params: camera.depth_params().to_array(),
            depth_size: [width as f32, height as f32],
            hzb_size: [hzb.width() as f32, hzb.height() as f32],
            near_z: -camera.near,
            far_z: -camera.far,
            thickness: s.thickness,
            stride: s.stride,
            jitter: s.jitter_fraction,
            max_distance: s.max_distance,
            max_steps_hzb: s.max_steps_hzb,
            max_steps_dda: s.max_steps_dda,
            hiz: s.hiz_ray_trace as u32,
            frame: self.frame_count as u32,
            hzb_mip_count: hzb.mip_count(),
            debug_mode: s.debug_mode.code(),
            debug_pixel: s.debug_mode.pixel(),
            _pad: [0; 2],
        }
    }

    /// Trace reflections for `camera` into `target` (`SSR_FORMAT`, COPY_SRC, depth-buffer sized).
    ///
    /// # Panics
    /// If the HZB was not allocated for a depth buffer of `target`'s size.
    pub fn execute(
        &mut self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        inputs: &SsrInputs,
        target: &wgpu::Texture,
    ) {
        let (width, height) = (target.width(), target.height());
        assert_eq!(
            (inputs.hzb.width(), inputs.hzb.height()),
            (next_pow2(width), next_pow2(height)),
            "ssr: HZB must be nextPow2 of the depth size"
        );
        self.ensure_targets(device, width, height);
        self.ensure_ray_path(device);
        self.frame_count += 1;

        let constants = self.constants(camera, width, height, inputs.hzb);
        let ubuf = shader::write_uniform(device, queue, "ssr_constants", &constants);
        let hzb_view = inputs.hzb.full_view();
        let ray_path = self.ray_path.as_ref().unwrap_or(&self.ray_path_placeholder);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ssr_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: ubuf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(inputs.color) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(inputs.depth) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&hzb_view) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(inputs.normal) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(inputs.specular_roughness) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::TextureView(inputs.diffuse_opacity) },
                wgpu::BindGroupEntry { binding: 7, resource: ray_path.as_entire_binding() },
            ],
        });

        let Some(targets) = &self.targets else {
            return;
        };
        let trace_view = targets.trace.create_view(&Default::default());
        shader::draw_fullscreen(
            encoder,
            "ssr_trace",
            &self.pipeline,
            &bind_group,
            &trace_view,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );

        let extent = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        if self.settings.debug_mode != SsrDebugMode::None {
            // Debug output bypasses accumulation.
            encoder.copy_texture_to_texture(targets.trace.as_image_copy(), target.as_image_copy(), extent);
            self.history_valid = false;
            return;
        }

        let history_view = targets.history.create_view(&Default::default());
        let target_view = target.create_view(&Default::default());
        self.temporal.encode(
            encoder,
            device,
            queue,
            &trace_view,
            &history_view,
            inputs.motion,
            self.history_valid,
            self.settings.temporal_alpha,
            &target_view,
        );
        encoder.copy_texture_to_texture(target.as_image_copy(), targets.history.as_image_copy(), extent);
        self.history_valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let s = SsrSettings::default();
        assert_eq!(s.thickness, 0.05);
        assert_eq!(s.stride, 1.0);
        assert_eq!(s.jitter_fraction, 1.0);
        assert_eq!(s.max_distance, 100.0);
        assert_eq!((s.max_steps_hzb, s.max_steps_dda), (64, 2048));
        assert!(s.hiz_ray_trace);
        assert_eq!(s.debug_mode, SsrDebugMode::None);
    }

    #[test]
    fn constants_layout_is_uniform_aligned() {
        assert_eq!(std::mem::size_of::<SsrConstants>(), 288);
        assert_eq!(std::mem::size_of::<SsrConstants>() % 16, 0);
    }

    #[test]
    fn debug_codes_match_shader() {
        assert_eq!(SsrDebugMode::None.code(), 0);
        assert_eq!(SsrDebugMode::IntersectionResult.code(), 1);
        assert_eq!(SsrDebugMode::RaymarchCount.code(), 2);
        let path = SsrDebugMode::RayPath { pixel: [3, 7] };
        assert_eq!((path.code(), path.pixel()), (3, [3, 7]));
    }
}
