//! Lightfield Renderer: wgpu hybrid deferred pipeline. G-buffer + shadows + deferred lights,
//! light-field probe GI, HZB screen-space reflections, SVGF denoising and present.

pub mod blit;
pub mod camera;
pub mod config;
pub mod error;
pub mod gbuffer;
pub mod hzb;
pub mod light_field;
pub mod light_pass;
pub mod present;
pub mod resources;
pub mod scope;
pub mod shader;
pub mod shadows;
pub mod ssr;
pub mod svgf;
pub mod temporal;

use glam::Mat4;

pub use blit::{BlitFilter, BlitMode, BlitPass};
pub use camera::Camera;
pub use config::{RendererConfig, ToneMapping};
pub use error::{RenderError, RenderResult};
pub use gbuffer::{GBufferPass, MaterialParams, MeshDraw};
pub use hzb::{HzbChain, HzbPass, HzbTexture};
pub use light_field::{
    Aabb, FilterSettings, IndirectKind, IndirectLighting, LightFieldConfig, LightFieldProbeVolume, ProbeDebugMode,
    ProbeDebugPass, ProbeGrid, ProbeRayTracing, ProbeScene,
};
pub use light_pass::{DirectionalLight, LightPass, SceneLights};
pub use present::PresentPass;
pub use resources::{FrameResources, GBufferTargets};
pub use scope::PassScope;
pub use shadows::{ShadowInput, ShadowPass, VisibilityPass};
pub use ssr::{SsrDebugMode, SsrInputs, SsrPass, SsrSettings};
pub use svgf::{SvgfPass, SvgfSettings};
pub use temporal::TemporalAccumulation;

/// Everything the renderer needs from the host for one frame.
pub struct FrameInput<'a> {
    pub width: u32,
    pub height: u32,
    pub camera: Camera,
    pub meshes: &'a [MeshDraw],
    pub lights: &'a SceneLights,
    /// World bounds of the visible meshes. `None` skips shadows and probe GI.
    pub scene_bounds: Option<Aabb>,
}

/// Renderer-owned intermediate images (reflections, probe lighting and their denoised copies).
struct StageTargets {
    ssr: wgpu::Texture,
    ssr_denoised: wgpu::Texture,
    gi_diffuse: wgpu::Texture,
    gi_specular: wgpu::Texture,
    width: u32,
    height: u32,
}

impl StageTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let target = |label| shader::render_target(device, label, width, height, 1, ssr::SSR_FORMAT);
        Self {
            ssr: target("ssr_output"),
            ssr_denoised: target("ssr_denoised"),
            gi_diffuse: target("gi_diffuse_denoised"),
            gi_specular: target("gi_specular_denoised"),
            width,
            height,
        }
    }
}

pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: RendererConfig,
    gbuffer_pass: GBufferPass,
    shadow_pass: ShadowPass,
    visibility_pass: VisibilityPass,
    light_pass: LightPass,
    hzb_pass: HzbPass,
    ssr_pass: SsrPass,
    ssr_svgf: SvgfPass,
    light_field: LightFieldProbeVolume,
    probe_tracing: ProbeRayTracing,
    gi_diffuse_svgf: SvgfPass,
    gi_specular_svgf: SvgfPass,
    indirect: IndirectLighting,
    probe_debug: ProbeDebugPass,
    blit: BlitPass,
    present_pass: PresentPass,
    frame_resources: Option<FrameResources>,
    stage_targets: Option<StageTargets>,
    prev_view_proj: Option<Mat4>,
}

impl Renderer {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> RenderResult<Self> {
        Self::new_with_config(device, queue, RendererConfig::default())
    }

    /// Fails with [`RenderError::Pipeline`] on backends that cannot compile the passes (GL).
    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: RendererConfig) -> RenderResult<Self> {
        let max_dim = device.limits().max_texture_dimension_2d;
        let lf = &config.light_field;
        let largest = lf.cube_resolution.max(lf.octahedral_resolution).max(config.shadow_resolution);
        if largest > max_dim {
            return Err(RenderError::device(format!("texture size {largest} exceeds device limit {max_dim}")));
        }
        log::info!(
            "renderer: shadows {} ssr {} gi {} ({:?} probes)",
            config.shadow_enabled,
            config.ssr_enabled,
            config.gi_enabled,
            config.light_field.probe_counts
        );
        // Pipeline failures are caught here instead of reaching the uncaptured-error handler.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut light_field = LightFieldProbeVolume::new(&device, config.light_field.clone());
        light_field.set_all_visible(config.probe_debug.is_some());
        let renderer = Self {
            gbuffer_pass: GBufferPass::new(&device, Some(wgpu::Face::Back)),
            shadow_pass: ShadowPass::new(&device, config.shadow_resolution.max(1)),
            visibility_pass: VisibilityPass::new(&device),
            light_pass: LightPass::new(&device),
            hzb_pass: HzbPass::new(&device),
            ssr_pass: SsrPass::new(&device, config.ssr.clone()),
            ssr_svgf: SvgfPass::new(&device, config.svgf.clone(), "svgf_ssr"),
            light_field,
            probe_tracing: ProbeRayTracing::new(&device),
            gi_diffuse_svgf: SvgfPass::new(&device, config.svgf.clone(), "svgf_gi_diffuse"),
            gi_specular_svgf: SvgfPass::new(&device, config.svgf.clone(), "svgf_gi_specular"),
            indirect: IndirectLighting::new(&device),
            probe_debug: ProbeDebugPass::new(&device),
            blit: BlitPass::new(&device, resources::LIGHT_BUFFER_FORMAT),
            present_pass: PresentPass::new(&device, config.swapchain_format, config.tone_mapping),
            frame_resources: None,
            stage_targets: None,
            prev_view_proj: None,
            device,
            queue,
            config,
        };
        error::pipeline_status(pollster::block_on(renderer.device.pop_error_scope()))?;
        Ok(renderer)
    }

    pub fn device(&self) -> &wgpu::Device { &self.device }
    pub fn queue(&self) -> &wgpu::Queue { &self.queue }
    pub fn config(&self) -> &RendererConfig { &self.config }
    pub fn ssr(&self) -> &SsrPass { &self.ssr_pass }
    pub fn ssr_mut(&mut self) -> &mut SsrPass { &mut self.ssr_pass }
    pub fn light_field(&self) -> &LightFieldProbeVolume { &self.light_field }
    pub fn light_field_mut(&mut self) -> &mut LightFieldProbeVolume { &mut self.light_field }
    pub fn ssr_svgf_mut(&mut self) -> &mut SvgfPass { &mut self.ssr_svgf }
    pub fn gi_svgf_mut(&mut self) -> (&mut SvgfPass, &mut SvgfPass) { (&mut self.gi_diffuse_svgf, &mut self.gi_specular_svgf) }

    pub fn set_ssr_enabled(&mut self, enabled: bool) {
        self.config.ssr_enabled = enabled;
    }

    pub fn set_gi_enabled(&mut self, enabled: bool) {
        self.config.gi_enabled = enabled;
    }

    /// Turning the viewer on shows every probe; individual probes can be hidden again through `light_field_mut`.
    pub fn set_probe_debug(&mut self, mode: Option<ProbeDebugMode>) {
        if mode.is_some() != self.config.probe_debug.is_some() {
            self.light_field.set_all_visible(mode.is_some());
        }
        self.config.probe_debug = mode;
    }

    /// View-projection the motion vectors of the next frame are measured against.
    pub fn prev_view_proj(&self) -> Option<Mat4> {
        self.prev_view_proj
    }

    /// Drop every temporal history. The next frame reprojects nothing.
    pub fn invalidate_history(&mut self) {
        log::debug!("renderer: history invalidated");
        self.ssr_pass.invalidate_history();
        self.ssr_svgf.invalidate_history();
        self.gi_diffuse_svgf.invalidate_history();
        self.gi_specular_svgf.invalidate_history();
        self.prev_view_proj = None;
    }

    pub fn ensure_frame_resources(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let existing = self.frame_resources.take();
        self.frame_resources = Some(FrameResources::ensure_size(&self.device, existing, width, height)?);
        if !matches!(&self.stage_targets, Some(t) if t.width == width && t.height == height) {
            self.stage_targets = Some(StageTargets::new(&self.device, width, height));
        }
        Ok(())
    }

    pub fn current_light_buffer(&self) -> Option<&wgpu::Texture> {
        self.frame_resources.as_ref().map(|f| &f.light_buffer)
    }

    pub fn frame_resources(&self) -> Option<&FrameResources> {
        self.frame_resources.as_ref()
    }

    /// Encode every stage up to (not including) present into `encoder`.
    pub fn encode_frame(&mut self, encoder: &mut wgpu::CommandEncoder, input: &FrameInput) -> RenderResult<()> {
        self.ensure_frame_resources(input.width, input.height)?;
        let device = &self.device;
        let queue = &self.queue;
        let frame = self.frame_resources.as_ref().ok_or(RenderError::NoFrame("encode_frame: frame resources missing"))?;
        let stage = self.stage_targets.as_ref().ok_or(RenderError::NoFrame("encode_frame: stage targets missing"))?;
        let camera = &input.camera;
        let gbuffer = &frame.gbuffer;
        let light_buffer = frame.light_buffer_view();
        let depth = gbuffer.depth_view();

        let light_vp = match (&input.lights.directional, input.scene_bounds) {
            (Some(dir), Some(bounds)) if self.config.shadow_enabled && !input.meshes.is_empty() => {
                let mut scope = PassScope::new(encoder, "shadow_map");
                let vp = shadows::light_view_proj(dir.direction, bounds.min, bounds.max);
                self.shadow_pass.encode(&mut scope, device, queue, input.meshes, &vp);
                Some(vp)
            }
            _ => None,
        };
        let shadow_map = self.shadow_pass.shadow_map_view();
        let shadow = light_vp.map(|light_view_proj| ShadowInput {
            shadow_map: &shadow_map,
            light_view_proj,
            resolution: self.shadow_pass.resolution(),
        });

        if self.config.gi_enabled {
            if let Some(bounds) = input.scene_bounds {
                let mut scope = PassScope::new(encoder, "light_field_volume");
                self.light_field.set_scene_bounds(bounds);
                let scene = ProbeScene {
                    meshes: input.meshes,
                    lights: input.lights,
                    shadow: light_vp.map(|light_view_proj| ShadowInput {
                        shadow_map: &shadow_map,
                        light_view_proj,
                        resolution: self.shadow_pass.resolution(),
                    }),
                };
                let updated = self.light_field.update(&mut scope, device, queue, &scene)?;
                if updated > 0 {
                    log::debug!("light field: {} probe(s) refreshed", updated);
                }
            }
        }

        {
            let mut scope = PassScope::new(encoder, "gbuffer");
            let prev = self.prev_view_proj.unwrap_or_else(|| camera.view_proj());
            self.gbuffer_pass.encode(&mut scope, device, queue, gbuffer, input.meshes, camera, prev, true);
        }
        let visibility = frame.visibility_view();
        {
            let mut scope = PassScope::new(encoder, "shadow_visibility");
            self.visibility_pass.encode(&mut scope, device, queue, camera, &depth, shadow.as_ref(), &visibility);
        }
        {
            let mut scope = PassScope::new(encoder, "light_pass");
            self.light_pass.encode(&mut scope, device, queue, gbuffer, &visibility, camera, input.lights, &light_buffer);
        }

        if self.config.gi_enabled {
            let mut scope = PassScope::new(encoder, "probe_gi");
            if self.probe_tracing.execute(&mut scope, device, queue, camera, &self.light_field, gbuffer) {
                let signals = [
                    (self.probe_tracing.diffuse_texture(), &mut self.gi_diffuse_svgf, &stage.gi_diffuse, IndirectKind::Diffuse),
                    (self.probe_tracing.glossy_texture(), &mut self.gi_specular_svgf, &stage.gi_specular, IndirectKind::Specular),
                ];
                for (traced, svgf, denoised, kind) in signals {
                    let Some(traced) = traced else { continue };
                    let lighting = if self.config.gi_denoise {
                        svgf.execute(&mut scope, device, queue, &traced.create_view(&Default::default()), gbuffer, denoised);
                        denoised.create_view(&Default::default())
                    } else {
                        traced.create_view(&Default::default())
                    };
                    self.indirect.encode(&mut scope, device, kind, &lighting, gbuffer, &light_buffer);
                }
            }
        }

        {
            let mut scope = PassScope::new(encoder, "hzb");
            self.hzb_pass.build(&mut scope, device, queue, &depth, input.width, input.height, &frame.hzb);
        }

        if self.config.ssr_enabled {
            let mut scope = PassScope::new(encoder, "ssr");
            let normal = gbuffer.normal_view();
            let diffuse_opacity = gbuffer.diffuse_opacity_view();
            let specular_roughness = gbuffer.specular_roughness_view();
            let motion = gbuffer.motion_view();
            let inputs = SsrInputs {
                color: &light_buffer,
                depth: &depth,
                hzb: &frame.hzb,
                normal: &normal,
                diffuse_opacity: &diffuse_opacity,
                specular_roughness: &specular_roughness,
                motion: &motion,
            };
            self.ssr_pass.execute(&mut scope, device, queue, camera, &inputs, &stage.ssr);
            let reflections = if self.config.ssr_denoise {
                self.ssr_svgf.execute(&mut scope, device, queue, &stage.ssr.create_view(&Default::default()), gbuffer, &stage.ssr_denoised);
                stage.ssr_denoised.create_view(&Default::default())
            } else {
                stage.ssr.create_view(&Default::default())
            };
            self.blit.encode(&mut scope, device, Some(&reflections), &light_buffer, BlitMode::Additive, BlitFilter::Point);
        }

        if let Some(mode) = self.config.probe_debug {
            let mut scope = PassScope::new(encoder, "probe_debug");
            self.probe_debug.encode(&mut scope, device, queue, camera, &self.light_field, mode, &depth, &light_buffer);
        }

        self.prev_view_proj = Some(camera.view_proj());
        Ok(())
    }

    /// Tone-mapped light buffer into `output_view` (e.g. the swapchain). Call after `encode_frame`.
    pub fn encode_present_to(&self, encoder: &mut wgpu::CommandEncoder, output_view: &wgpu::TextureView) -> RenderResult<()> {
        let frame = self
            .frame_resources
            .as_ref()
            .ok_or(RenderError::NoFrame("encode_present_to: call encode_frame first"))?;
        let mut scope = PassScope::new(encoder, "present");
        self.present_pass.encode(&mut scope, &self.device, &self.queue, &frame.light_buffer_view(), output_view);
        Ok(())
    }

    /// Encode a whole frame, presenting into `output_view` when given.
    pub fn render_frame(&mut self, input: &FrameInput, output_view: Option<&wgpu::TextureView>) -> RenderResult<wgpu::CommandBuffer> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lightfield_frame") });
        self.encode_frame(&mut encoder, input)?;
        if let Some(view) = output_view {
            self.encode_present_to(&mut encoder, view)?;
        }
        Ok(encoder.finish())
    }

    pub fn submit(&self, command_buffers: impl IntoIterator<Item = wgpu::CommandBuffer>) {
        self.queue.submit(command_buffers);
    }
}
