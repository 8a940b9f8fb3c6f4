//! Spatiotemporal variance-guided filtering.
//!
//! Three stages per `execute`: temporal reprojection (running means of colour and luminance
//! moments plus a history length), variance estimation (spatial fallback while the history is
//! short) and `atrous_iterations` rounds of an edge-aware à-trous filter. The output of
//! iteration `feedback_tap` becomes next frame's history.

pub mod reference;

use wgpu::CommandEncoder;

use crate::resources::GBufferTargets;
use crate::shader;

const SVGF_SHADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/svgf.wgsl"));

pub const SVGF_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

#[derive(Clone, Debug)]
pub struct SvgfSettings {
    pub atrous_iterations: u32,
    /// Iteration whose output is fed back as history.
    pub feedback_tap: u32,
    /// Kernel radius in taps (2 gives the 5x5 kernel).
    pub atrous_radius: u32,
    /// Minimum blend weight of the current colour.
    pub alpha: f32,
    pub moments_alpha: f32,
    pub phi_color: f32,
    pub phi_normal: f32,
    pub temporal_reprojection: bool,
    pub spatial_variance: bool,
}

impl Default for SvgfSettings {
    fn default() -> Self {
        Self {
            atrous_iterations: 4,
            feedback_tap: 1,
            atrous_radius: 2,
            alpha: 0.05,
            moments_alpha: 0.2,
            phi_color: 10.0,
            phi_normal: 128.0,
            temporal_reprojection: true,
            spatial_variance: true,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SvgfParams {
    alpha: f32,
    moments_alpha: f32,
    phi_color: f32,
    phi_normal: f32,
    step_size: u32,
    radius: u32,
    history_valid: u32,
    spatial_variance: u32,
}

struct SvgfTargets {
    illumination: wgpu::Texture,
    moments: wgpu::Texture,
    prev_moments: wgpu::Texture,
    ping: wgpu::Texture,
    pong: wgpu::Texture,
    /// Filtered output of `feedback_tap`, read by next frame's reprojection.
    feedback: wgpu::Texture,
    prev_compact_normal_depth: wgpu::Texture,
    width: u32,
    height: u32,
}

impl SvgfTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let target = |label| shader::render_target(device, label, width, height, 1, SVGF_FORMAT);
        Self {
            illumination: target("svgf_illumination"),
            moments: target("svgf_moments"),
            prev_moments: target("svgf_prev_moments"),
            ping: target("svgf_ping"),
            pong: target("svgf_pong"),
            feedback: target("svgf_feedback"),
            prev_compact_normal_depth: target("svgf_prev_compact_normal_depth"),
            width,
            height,
        }
    }
}

fn view(texture: &wgpu::Texture) -> wgpu::TextureView {
    texture.create_view(&Default::default())
}

fn texture_binding(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry { binding, resource: wgpu::BindingResource::TextureView(view) }
}

pub struct SvgfPass {
    reprojection_pipeline: wgpu::RenderPipeline,
    reprojection_layout: wgpu::BindGroupLayout,
    variance_pipeline: wgpu::RenderPipeline,
    variance_layout: wgpu::BindGroupLayout,
    atrous_pipeline: wgpu::RenderPipeline,
    atrous_layout: wgpu::BindGroupLayout,
    settings: SvgfSettings,
    targets: Option<SvgfTargets>,
    history_valid: bool,
    label: &'static str,
}

impl SvgfPass {
    /// `label` names this instance in logs and debug groups (one pass per denoised signal).
    pub fn new(device: &wgpu::Device, settings: SvgfSettings, label: &'static str) -> Self {
        let module = shader::create_module(device, "svgf_shader", SVGF_SHADER);
        let params = shader::uniform_entry(0, wgpu::ShaderStages::FRAGMENT, std::mem::size_of::<SvgfParams>() as u64);
        let make_layout = |label, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries })
        };
        let reprojection_layout = make_layout(
            "svgf_reprojection_layout",
            &[
                params,
                shader::float_texture_entry(1),
                shader::float_texture_entry(2),
                shader::float_texture_entry(3),
                shader::float_texture_entry(4),
                shader::float_texture_entry(5),
                shader::float_texture_entry(6),
            ],
        );
        let variance_layout = make_layout(
            "svgf_variance_layout",
            &[params, shader::float_texture_entry(3), shader::float_texture_entry(7), shader::float_texture_entry(8)],
        );
        let atrous_layout =
            make_layout("svgf_atrous_layout", &[params, shader::float_texture_entry(3), shader::float_texture_entry(9)]);

        let pipeline = |label, layout: &wgpu::BindGroupLayout, entry, targets: &[Option<wgpu::ColorTargetState>]| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            shader::fullscreen_pipeline(device, label, &module, &pipeline_layout, entry, targets)
        };
        let one = [Some(wgpu::ColorTargetState::from(SVGF_FORMAT))];
        let two = [Some(wgpu::ColorTargetState::from(SVGF_FORMAT)), Some(wgpu::ColorTargetState::from(SVGF_FORMAT))];
        Self {
            reprojection_pipeline: pipeline("svgf_reprojection", &reprojection_layout, "fs_reprojection", &two),
            variance_pipeline: pipeline("svgf_variance", &variance_layout, "fs_variance", &one),
            atrous_pipeline: pipeline("svgf_atrous", &atrous_layout, "fs_atrous", &one),
            reprojection_layout,
            variance_layout,
            atrous_layout,
            settings,
            targets: None,
            history_valid: false,
            label,
        }
    }

    pub fn settings(&self) -> &SvgfSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SvgfSettings {
        &mut self.settings
    }

    pub fn set_atrous_iterations(&mut self, iterations: u32) {
        self.settings.atrous_iterations = iterations;
    }

    pub fn set_feedback_tap(&mut self, tap: u32) {
        self.settings.feedback_tap = tap;
    }

    pub fn set_phi(&mut self, phi_color: f32, phi_normal: f32) {
        self.settings.phi_color = phi_color;
        self.settings.phi_normal = phi_normal;
    }

    pub fn set_alpha(&mut self, alpha: f32, moments_alpha: f32) {
        self.settings.alpha = alpha;
        self.settings.moments_alpha = moments_alpha;
    }

    pub fn invalidate_history(&mut self) {
        self.history_valid = false;
    }

    fn ensure_targets(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if matches!(&self.targets, Some(t) if t.width == width && t.height == height) {
            return;
        }
        log::info!("svgf[{}]: allocating {}x{} targets", self.label, width, height);
        self.targets = Some(SvgfTargets::new(device, width, height));
        self.history_valid = false;
    }

    fn params(&self, step_size: u32, history_valid: bool) -> SvgfParams {
        let s = &self.settings;
        SvgfParams {
            alpha: s.alpha,
            moments_alpha: s.moments_alpha,
            phi_color: s.phi_color,
            phi_normal: s.phi_normal,
            step_size,
            radius: s.atrous_radius,
            history_valid: history_valid as u32,
            spatial_variance: s.spatial_variance as u32,
        }
    }

    /// Denoise `illumination` into `target` (`SVGF_FORMAT`, COPY_DST, G-buffer sized).
    pub fn execute(
        &mut self,
        encoder: &mut CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        illumination: &wgpu::TextureView,
        gbuffer: &GBufferTargets,
        target: &wgpu::Texture,
    ) {
        let (width, height) = (gbuffer.width(), gbuffer.height());
        self.ensure_targets(device, width, height);
        let history_valid = self.history_valid && self.settings.temporal_reprojection;
        let Some(t) = &self.targets else {
            return;
        };
        let motion = gbuffer.motion_view();
        let compact = gbuffer.compact_normal_depth_view();

        let ubuf = shader::write_uniform(device, queue, "svgf_reprojection_params", &self.params(1, history_valid));
        let (prev_compact, feedback, prev_moments) = (view(&t.prev_compact_normal_depth), view(&t.feedback), view(&t.prev_moments));
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("svgf_reprojection_bind_group"),
            layout: &self.reprojection_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: ubuf.as_entire_binding() },
                texture_binding(1, illumination),
                texture_binding(2, &motion),
                texture_binding(3, &compact),
                texture_binding(4, &prev_compact),
                texture_binding(5, &feedback),
                texture_binding(6, &prev_moments),
            ],
        });
        let (illum_view, moments_view) = (view(&t.illumination), view(&t.moments));
        shader::draw_fullscreen_mrt(
            encoder,
            "svgf_reprojection",
            &self.reprojection_pipeline,
            &bg,
            &[
                shader::clear_attachment(&illum_view, wgpu::Color::TRANSPARENT),
                shader::clear_attachment(&moments_view, wgpu::Color::TRANSPARENT),
            ],
        );

        let ubuf = shader::write_uniform(device, queue, "svgf_variance_params", &self.params(1, history_valid));
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("svgf_variance_bind_group"),
            layout: &self.variance_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: ubuf.as_entire_binding() },
                texture_binding(3, &compact),
                texture_binding(7, &illum_view),
                texture_binding(8, &moments_view),
            ],
        });
        shader::draw_fullscreen(
            encoder,
            "svgf_variance",
            &self.variance_pipeline,
            &bg,
            &view(&t.ping),
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
        );

        let extent = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let (mut src, mut dst) = (&t.ping, &t.pong);
        let mut fed_back = false;
        for i in 0..self.settings.atrous_iterations {
            let ubuf = shader::write_uniform(device, queue, "svgf_atrous_params", &self.params(1 << i, history_valid));
            let src_view = view(src);
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("svgf_atrous_bind_group"),
                layout: &self.atrous_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: ubuf.as_entire_binding() },
                    texture_binding(3, &compact),
                    texture_binding(9, &src_view),
                ],
            });
            shader::draw_fullscreen(
                encoder,
                "svgf_atrous",
                &self.atrous_pipeline,
                &bg,
                &view(dst),
                wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            );
            if i == self.settings.feedback_tap {
                encoder.copy_texture_to_texture(dst.as_image_copy(), t.feedback.as_image_copy(), extent);
                fed_back = true;
            }
            std::mem::swap(&mut src, &mut dst);
        }
        if !fed_back {
            encoder.copy_texture_to_texture(src.as_image_copy(), t.feedback.as_image_copy(), extent);
        }
        encoder.copy_texture_to_texture(src.as_image_copy(), target.as_image_copy(), extent);
        encoder.copy_texture_to_texture(t.moments.as_image_copy(), t.prev_moments.as_image_copy(), extent);
        encoder.copy_texture_to_texture(
            gbuffer.compact_normal_depth.as_image_copy(),
            t.prev_compact_normal_depth.as_image_copy(),
            extent,
        );
        self.history_valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let s = SvgfSettings::default();
        assert_eq!((s.atrous_iterations, s.feedback_tap, s.atrous_radius), (4, 1, 2));
        assert_eq!((s.alpha, s.moments_alpha), (0.05, 0.2));
        assert_eq!((s.phi_color, s.phi_normal), (10.0, 128.0));
        assert!(s.temporal_reprojection && s.spatial_variance);
    }

    #[test]
    fn params_are_uniform_aligned() {
        assert_eq!(std::mem::size_of::<SvgfParams>(), 32);
    }
}
